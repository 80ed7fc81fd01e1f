//! Transaction related.

use crate::difficulty::DIFFICULTY_TARGET;

/// Hard cap on a serialized transaction.
pub const MAX_TX_SIZE: usize = 1_000_000_000;

/// An output locked until block `h` may be spent once the chain is
/// within this many blocks of `h`.
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;

/// Time-locked equivalent of [`LOCKED_TX_ALLOWED_DELTA_BLOCKS`].
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 =
    DIFFICULTY_TARGET * LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Seconds a transaction may sit in the pool before the expiry sweep
/// drops it.
pub const MEMPOOL_TX_LIVETIME: u64 = 60 * 60 * 14;

/// Livetime for transactions re-added to the pool by a reorg.
pub const MEMPOOL_TX_FROM_ALT_BLOCK_LIVETIME: u64 = 60 * 60 * 24;
