//! Block related.

/// Heights at or above this value are not valid block indexes; an
/// unlock time below it is interpreted as a block index, at or above it
/// as a Unix timestamp.
pub const MAX_BLOCK_NUMBER: u32 = 500_000_000;

/// Hard cap on a serialized block, independent of the dynamic limit.
pub const MAX_BLOCK_BLOB_SIZE: usize = 500_000_000;

/// Number of blocks a coinbase output stays locked after being mined.
///
/// ```rust
/// # use azurite_constants::block::*;
/// assert_eq!(MINED_MONEY_UNLOCK_WINDOW, 6);
/// ```
pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 6;

/// How far into the future (seconds) a block timestamp may lie.
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;

/// Number of trailing blocks whose timestamp median bounds a new
/// block's timestamp from below.
pub const TIMESTAMP_CHECK_WINDOW: usize = 30;

/// Number of trailing blocks whose size median feeds the reward
/// penalty.
pub const REWARD_BLOCKS_WINDOW: usize = 100;

/// Block size (bytes) up to which the full reward is granted.
pub const BLOCK_GRANTED_FULL_REWARD_ZONE: usize = 32_000;

/// Bytes reserved for the coinbase transaction when filling a block
/// template from the pool.
pub const COINBASE_BLOB_RESERVED_SIZE: usize = 600;

/// Dynamic block size limit at height 0.
pub const MAX_BLOCK_SIZE_INITIAL: usize = BLOCK_GRANTED_FULL_REWARD_ZONE * 10;

/// The dynamic block size limit grows by `NUMERATOR / DENOMINATOR`
/// bytes per block.
pub const MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR: u64 = 100 * 1024;
/// See [`MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR`].
pub const MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR: u64 =
    365 * 24 * 60 * 60 / crate::difficulty::DIFFICULTY_TARGET;

/// Alternative blocks deeper than this below the current top are
/// rejected instead of being tracked for a potential reorg.
pub const ALT_BLOCK_DEPTH_LIMIT: u32 = 720;
