//! Protocol upgrade (major version) related.

use crate::difficulty::EXPECTED_NUMBER_OF_BLOCKS_PER_DAY;

/// Blocks scanned when tallying upgrade votes.
pub const UPGRADE_VOTING_WINDOW: u32 = EXPECTED_NUMBER_OF_BLOCKS_PER_DAY as u32;

/// Percentage of the window that must vote for the next version.
pub const UPGRADE_VOTING_THRESHOLD: u32 = 90;

const _: () = assert!(UPGRADE_VOTING_THRESHOLD <= 100);

/// Once voting completes, the switch happens this many blocks later.
pub const UPGRADE_WINDOW: u32 = EXPECTED_NUMBER_OF_BLOCKS_PER_DAY as u32;

/// The minor version value that counts as a vote for the next major
/// version.
pub const BLOCK_MINOR_VERSION_VOTE: u8 = 1;
