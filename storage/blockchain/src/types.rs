//! Records persisted by the cache, and the detached snapshot a split
//! produces.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::{BTreeMap, BTreeSet};

use bincode::{Decode, Encode};

use azurite_types::{
    Amount, BlockIndex, Difficulty, GlobalOutputIndex, Hash, KeyImage, PublicKey, RawBlock,
    Transaction,
};

//---------------------------------------------------------------------------------------------------- CachedBlockInfo
/// Per-block metadata, stored under `'6'` by block index.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CachedBlockInfo {
    pub block_hash: Hash,
    pub timestamp: u64,
    /// Strictly increasing along the chain.
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: u64,
    pub already_generated_transactions: u64,
    pub block_size: u32,
}

//---------------------------------------------------------------------------------------------------- PackedOutputReference
/// Three-integer coordinate of a single output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PackedOutputReference {
    pub block_index: BlockIndex,
    pub transaction_index: u16,
    pub output_index: u16,
}

//---------------------------------------------------------------------------------------------------- ExtendedTransactionInfo
/// Per-transaction record, stored under `'a'` by transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ExtendedTransactionInfo {
    pub transaction: Transaction,
    pub transaction_hash: Hash,
    pub block_index: BlockIndex,
    /// Position within the block; 0 is the coinbase.
    pub transaction_index: u16,
    pub unlock_time: u64,
    /// The global index assigned to each output at append time, in
    /// output order.
    pub global_indexes: Vec<GlobalOutputIndex>,
    /// The same indexes grouped by amount, for split boundaries.
    pub amount_to_key_indexes: BTreeMap<Amount, Vec<GlobalOutputIndex>>,
}

//---------------------------------------------------------------------------------------------------- KeyOutputInfo
/// Denormalized per-output record for ring-member lookups, stored
/// under `'j'` by `(amount, global index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct KeyOutputInfo {
    pub public_key: PublicKey,
    pub transaction_hash: Hash,
    pub output_index: u16,
    pub unlock_time: u64,
}

//---------------------------------------------------------------------------------------------------- ValidatorState
/// What input verification learned about a block: the key images its
/// transactions spend. Ordered so batches serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ValidatorState {
    pub spent_key_images: BTreeSet<KeyImage>,
}

//---------------------------------------------------------------------------------------------------- PushedBlockInfo
/// Everything needed to push one block into a cache without
/// revalidating it.
#[derive(Debug, Clone, Encode, Decode)]
pub struct PushedBlockInfo {
    pub raw_block: RawBlock,
    pub validator_state: ValidatorState,
    pub block_size: u64,
    pub generated_coins: u64,
    pub block_difficulty: Difficulty,
    pub timestamp: u64,
}

//---------------------------------------------------------------------------------------------------- SplitSegment
/// The detached suffix a [`split`](crate::BlockchainCache::split)
/// removes: blocks `start_index..start_index + blocks.len()`, oldest
/// first, ready to be reapplied on rollback.
#[derive(Debug, Clone)]
pub struct SplitSegment {
    pub start_index: BlockIndex,
    pub blocks: Vec<PushedBlockInfo>,
}
