//! Difficulty related.

/// Target seconds between blocks.
///
/// ```rust
/// # use azurite_constants::difficulty::*;
/// assert_eq!(DIFFICULTY_TARGET, 240);
/// ```
pub const DIFFICULTY_TARGET: u64 = 240;

/// Blocks mined per day at the target rate.
pub const EXPECTED_NUMBER_OF_BLOCKS_PER_DAY: u64 = 24 * 60 * 60 / DIFFICULTY_TARGET;

/// The amount of blocks accounted for when retargeting difficulty.
pub const DIFFICULTY_WINDOW: usize = 240;

/// Timestamps cut from each end of the sorted window.
pub const DIFFICULTY_CUT: usize = 30;

/// The retarget window lags behind the chain tip by this many blocks.
pub const DIFFICULTY_LAG: usize = 15;

const _: () = assert!(2 * DIFFICULTY_CUT <= DIFFICULTY_WINDOW - 2);

/// Total blocks needed in the retarget cache.
pub const DIFFICULTY_BLOCKS_COUNT: usize = DIFFICULTY_WINDOW + DIFFICULTY_LAG;
