//! Checkpoints: (height, hash) pairs treated as ground truth.
//!
//! Blocks at or below the highest checkpoint skip proof-of-work and
//! must match the recorded hash instead, and the chain below it can
//! never be reorganized out.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::BTreeMap;

use azurite_types::{BlockIndex, Hash};

//---------------------------------------------------------------------------------------------------- Checkpoints
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<BlockIndex, Hash>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a checkpoint. A conflicting hash for an existing
    /// height is refused.
    pub fn add(&mut self, index: BlockIndex, hash: Hash) -> Result<(), Hash> {
        if let Some(existing) = self.points.get(&index) {
            if *existing != hash {
                return Err(*existing);
            }
        }
        self.points.insert(index, hash);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Highest checkpointed height, if any.
    pub fn top_checkpoint_index(&self) -> Option<BlockIndex> {
        self.points.keys().next_back().copied()
    }

    /// Whether `index` is at or below the highest checkpoint.
    pub fn is_in_checkpoint_zone(&self, index: BlockIndex) -> bool {
        self.top_checkpoint_index()
            .is_some_and(|top| index <= top)
    }

    /// Whether a block at a checkpointed height carries the expected
    /// hash. Heights between checkpoints pass.
    pub fn check_block(&self, index: BlockIndex, hash: &Hash) -> bool {
        match self.points.get(&index) {
            Some(expected) => expected == hash,
            None => true,
        }
    }

    /// Whether the chain may be rewound to `index` (exclusive of
    /// everything at or below the highest checkpoint).
    pub fn is_alternative_block_allowed(
        &self,
        chain_height: BlockIndex,
        block_index: BlockIndex,
    ) -> bool {
        if block_index == 0 {
            return false;
        }
        match self.points.range(..=chain_height).next_back() {
            Some((&checkpoint, _)) => checkpoint < block_index,
            None => true,
        }
    }
}
