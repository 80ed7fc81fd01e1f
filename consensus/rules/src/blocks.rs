//! Block header rules and proof-of-work.

//---------------------------------------------------------------------------------------------------- Import
use primitive_types::U256;

use azurite_types::{Block, Difficulty, Hash};

use crate::{Currency, MinerTxError};

//---------------------------------------------------------------------------------------------------- Error
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("the block's proof-of-work is invalid")]
    PowInvalid,
    #[error("the block does not match the checkpoint at its height")]
    CheckpointMismatch,
    #[error("the block is too big")]
    TooLarge,
    #[error("the block's major version is wrong for its height")]
    VersionIncorrect,
    #[error("the block's previous hash is not the chain's top")]
    PreviousIdIncorrect,
    #[error("the block's timestamp is outside the accepted window")]
    TimestampInvalid,
    #[error("coinbase error: {0}")]
    MinerTx(#[from] MinerTxError),
}

//---------------------------------------------------------------------------------------------------- PowHasher
/// The proof-of-work hash function, supplied by the embedder.
///
/// The rules only need the 32-byte digest of a hashing blob; which
/// memory-hard function produces it is a deployment concern.
pub trait PowHasher {
    fn pow_hash(&self, hashing_blob: &[u8]) -> [u8; 32];
}

impl<F: Fn(&[u8]) -> [u8; 32]> PowHasher for F {
    fn pow_hash(&self, hashing_blob: &[u8]) -> [u8; 32] {
        self(hashing_blob)
    }
}

//---------------------------------------------------------------------------------------------------- Public API
/// Returns whether `hash` meets `difficulty`: the hash read as a
/// little-endian 256-bit integer multiplied by the difficulty must not
/// overflow 2^256.
pub fn check_block_pow(hash: &[u8; 32], difficulty: Difficulty) -> Result<(), BlockError> {
    let int_hash = U256::from_little_endian(hash);

    if int_hash.checked_mul(U256::from(difficulty)).is_none() {
        tracing::debug!(
            hash = hex::encode(hash),
            difficulty,
            "invalid proof-of-work"
        );
        Err(BlockError::PowInvalid)
    } else {
        Ok(())
    }
}

/// Checks the header's major version against the upgrade schedule's
/// expectation for this height.
pub fn check_block_version(expected_major: u8, block: &Block) -> Result<(), BlockError> {
    if block.header.major_version != expected_major {
        return Err(BlockError::VersionIncorrect);
    }
    Ok(())
}

/// Checks the header's previous hash is the current top.
pub fn check_prev_id(block: &Block, top_hash: &Hash) -> Result<(), BlockError> {
    if block.header.previous != *top_hash {
        return Err(BlockError::PreviousIdIncorrect);
    }
    Ok(())
}

/// Checks the timestamp lies in `[median_timestamp, now + future
/// limit]`, both ends inclusive.
pub fn check_timestamp(
    currency: &Currency,
    block: &Block,
    median_timestamp: u64,
    now: u64,
) -> Result<(), BlockError> {
    if block.header.timestamp < median_timestamp
        || block.header.timestamp > now + currency.block_future_time_limit()
    {
        return Err(BlockError::TimestampInvalid);
    }
    Ok(())
}

/// Checks the full serialized size against the dynamic limit for this
/// height and the penalty ceiling for this median.
pub fn check_block_size(
    currency: &Currency,
    cumulative_size: usize,
    effective_median: usize,
    height: u64,
) -> Result<(), BlockError> {
    if cumulative_size > 2 * effective_median
        || cumulative_size > currency.max_block_cumulative_size(height)
    {
        return Err(BlockError::TooLarge);
    }
    Ok(())
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::CurrencyBuilder;

    fn currency() -> Currency {
        CurrencyBuilder::new().build()
    }

    fn block_with_timestamp(timestamp: u64) -> Block {
        let mut block = currency().genesis_block().block().clone();
        block.header.timestamp = timestamp;
        block
    }

    #[test]
    fn difficulty_one_accepts_any_hash() {
        assert!(check_block_pow(&[0xff; 32], 1).is_ok());
    }

    #[test]
    fn all_zero_hash_meets_any_difficulty() {
        assert!(check_block_pow(&[0; 32], u64::MAX).is_ok());
    }

    #[test]
    fn high_hash_fails_high_difficulty() {
        assert_eq!(
            check_block_pow(&[0xff; 32], 2),
            Err(BlockError::PowInvalid)
        );
    }

    #[test]
    fn pow_boundary_is_exact() {
        // hash = 2^255 exactly: difficulty 2 saturates 2^256 which
        // overflows the multiply.
        let mut hash = [0_u8; 32];
        hash[31] = 0x80;
        assert_eq!(check_block_pow(&hash, 2), Err(BlockError::PowInvalid));
        // One below passes.
        let mut hash = [0xff_u8; 32];
        hash[31] = 0x7f;
        assert!(check_block_pow(&hash, 2).is_ok());
    }

    #[test]
    fn future_limit_is_inclusive() {
        let c = currency();
        let now = 1_000_000;
        let limit = now + c.block_future_time_limit();

        assert!(check_timestamp(&c, &block_with_timestamp(limit), 0, now).is_ok());
        assert_eq!(
            check_timestamp(&c, &block_with_timestamp(limit + 1), 0, now),
            Err(BlockError::TimestampInvalid)
        );
    }

    #[test]
    fn median_bounds_from_below() {
        let c = currency();
        assert_eq!(
            check_timestamp(&c, &block_with_timestamp(99), 100, 1_000_000),
            Err(BlockError::TimestampInvalid)
        );
        assert!(check_timestamp(&c, &block_with_timestamp(100), 100, 1_000_000).is_ok());
    }

    #[test]
    fn version_must_match_expectation() {
        let c = currency();
        let block = c.genesis_block().block().clone();
        assert!(check_block_version(1, &block).is_ok());
        assert_eq!(
            check_block_version(2, &block),
            Err(BlockError::VersionIncorrect)
        );
    }
}
