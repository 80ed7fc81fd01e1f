//! The chain manager: append, pop, fork tracking and reorganization.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::HashMap;
use std::sync::Arc;

use azurite_blockchain::{BlockchainCache, SplitSegment, ValidatorState};
use azurite_consensus_rules::{
    blocks::{
        check_block_pow, check_block_size, check_block_version, check_prev_id, check_timestamp,
    },
    difficulty::next_difficulty,
    miner_tx::check_coinbase,
    Currency, PowHasher, RingSignatureVerifier, UpgradeManager,
};
use azurite_database::Database;
use azurite_helper::num::median;
use azurite_txpool::{PoolTransaction, TransactionPool};
use azurite_types::{
    BlockIndex, CachedBlock, CachedTransaction, Difficulty, Hash, RawBlock,
};

use crate::{
    checkpoints::Checkpoints,
    error::CoreError,
    validator::{check_transaction_inputs, ChainInputValidator},
};

//---------------------------------------------------------------------------------------------------- Types
/// What happened to a structurally valid incoming block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddResult {
    AddedToMainChain,
    AddedToAltChain,
    Reorganized,
    AlreadyExists,
}

/// One tracked alternative-chain block.
#[derive(Debug, Clone)]
struct AltChainBlock {
    cached_block: CachedBlock,
    raw_block: RawBlock,
    height: BlockIndex,
    cumulative_difficulty: Difficulty,
}

//---------------------------------------------------------------------------------------------------- ChainManager
/// Owns the persistent cache and reconciles competing chains.
pub struct ChainManager<D, P, R> {
    currency: Arc<Currency>,
    cache: BlockchainCache<D>,
    alt_blocks: HashMap<Hash, AltChainBlock>,
    upgrade_manager: UpgradeManager,
    checkpoints: Checkpoints,
    pow: P,
    ring_verifier: R,
}

impl<D: Database, P: PowHasher, R: RingSignatureVerifier> ChainManager<D, P, R> {
    pub fn new(
        currency: Arc<Currency>,
        db: D,
        pow: P,
        ring_verifier: R,
        checkpoints: Checkpoints,
    ) -> Result<Self, CoreError> {
        let cache = BlockchainCache::open(Arc::clone(&currency), db)?;
        let mut upgrade_manager = UpgradeManager::new(&currency);

        // Rebuild the voting window from the chain tail.
        let top = cache.top_block_index()?;
        let window = currency.upgrade_voting_window();
        let start = top.saturating_sub(window.saturating_sub(1));
        let mut versions = Vec::with_capacity((top - start + 1) as usize);
        for index in start..=top {
            let block = cache.block_by_index(index)?;
            let header = block.block().header;
            versions.push((index, header.major_version, header.minor_version));
        }
        upgrade_manager.rescan(&versions);

        Ok(Self {
            currency,
            cache,
            alt_blocks: HashMap::new(),
            upgrade_manager,
            checkpoints,
            pow,
            ring_verifier,
        })
    }

    pub fn cache(&self) -> &BlockchainCache<D> {
        &self.cache
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn checkpoints_mut(&mut self) -> &mut Checkpoints {
        &mut self.checkpoints
    }

    /// The pool-admission seam over this chain.
    pub fn input_validator(&self) -> ChainInputValidator<'_, D, R> {
        ChainInputValidator {
            cache: &self.cache,
            verifier: &self.ring_verifier,
        }
    }

    /// The major version a block at `height` must carry.
    pub fn expected_major_version(&self, height: BlockIndex) -> u8 {
        self.upgrade_manager.block_major_version_for_height(height)
    }

    /// The difficulty the next main-chain block must meet.
    pub fn next_block_difficulty(&self) -> Result<Difficulty, CoreError> {
        let top = self.cache.top_block_index()?;
        let count = self.currency.difficulty_blocks_count();
        let timestamps = self.cache.last_timestamps(count, top, true)?;
        let difficulties = self.cache.last_cumulative_difficulties(count, top, true)?;
        Ok(next_difficulty(&self.currency, timestamps, difficulties))
    }

    //------------------------------------------------ Incoming blocks

    /// Route a parsed block: duplicate, main-chain append, or the
    /// alternative-chain path.
    pub fn handle_block(
        &mut self,
        cached_block: CachedBlock,
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<BlockAddResult, CoreError> {
        let hash = *cached_block.hash();
        if self.cache.has_block(&hash)? || self.alt_blocks.contains_key(&hash) {
            tracing::debug!(block = %hash, "duplicate block");
            return Ok(BlockAddResult::AlreadyExists);
        }

        if cached_block.block().header.previous == self.cache.top_block_hash()? {
            self.push_main_block(&cached_block, pool, now)?;
            Ok(BlockAddResult::AddedToMainChain)
        } else {
            self.handle_alt_block(cached_block, pool, now)
        }
    }

    /// The append path: full validation against the current top, then
    /// one atomic cache push.
    fn push_main_block(
        &mut self,
        cached_block: &CachedBlock,
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<(), CoreError> {
        let block = cached_block.block();
        let top = self.cache.top_block_index()?;
        let new_index = top + 1;

        check_prev_id(block, &self.cache.top_block_hash()?)?;
        check_block_version(self.expected_major_version(new_index), block)?;

        let mut timestamps = self
            .cache
            .last_timestamps(self.currency.timestamp_check_window(), top, true)?;
        timestamps.sort_unstable();
        check_timestamp(&self.currency, block, median(&timestamps), now)?;

        // The block's transactions must already sit in the pool; they
        // go back on any failure past this point.
        let entries = self.take_pool_transactions(pool, &block.transaction_hashes)?;
        let result = self.validate_and_push(cached_block, &entries, new_index);

        match result {
            Ok(spent_images) => {
                let header = block.header;
                self.upgrade_manager.block_pushed(
                    new_index,
                    header.major_version,
                    header.minor_version,
                );
                pool.remove_spending(&spent_images);
                Ok(())
            }
            Err(e) => {
                for entry in entries {
                    pool.restore_transaction(entry);
                }
                Err(e)
            }
        }
    }

    fn take_pool_transactions(
        &self,
        pool: &mut TransactionPool,
        hashes: &[Hash],
    ) -> Result<Vec<PoolTransaction>, CoreError> {
        let mut entries = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match pool.take_transaction(hash) {
                Some(entry) => entries.push(entry),
                None => {
                    for entry in entries {
                        pool.restore_transaction(entry);
                    }
                    return Err(CoreError::MissingPoolTx(*hash));
                }
            }
        }
        Ok(entries)
    }

    fn validate_and_push(
        &mut self,
        cached_block: &CachedBlock,
        entries: &[PoolTransaction],
        new_index: BlockIndex,
    ) -> Result<Vec<azurite_types::KeyImage>, CoreError> {
        let block = cached_block.block();
        let top = new_index - 1;

        let raw_block = RawBlock {
            block: cached_block.blob().to_vec(),
            transactions: entries
                .iter()
                .map(|entry| entry.cached().blob().to_vec())
                .collect(),
        };
        let cumulative_size = raw_block.size();

        let mut sizes = self
            .cache
            .last_block_sizes(self.currency.reward_blocks_window(), top, true)?;
        sizes.sort_unstable();
        let median_size = median(&sizes) as usize;
        let effective_median = median_size.max(self.currency.block_granted_full_reward_zone());

        check_block_size(
            &self.currency,
            cumulative_size,
            effective_median,
            u64::from(new_index),
        )?;

        let mut fees = 0_u64;
        for entry in entries {
            fees += entry.fee();
        }

        let parent = self.cache.block_info(top)?;
        let penalize_fee = self.upgrade_manager.penalize_fee_at(new_index);
        let emission_change = check_coinbase(
            &self.currency,
            &block.coinbase,
            new_index,
            median_size,
            cumulative_size,
            fees,
            parent.already_generated_coins,
            penalize_fee,
        )?;
        let generated_coins = u64::try_from(emission_change).unwrap_or(0);

        // Proof-of-work, or the checkpoint hash inside the zone.
        let block_difficulty = self.next_block_difficulty()?;
        if self.checkpoints.is_in_checkpoint_zone(new_index) {
            if !self.checkpoints.check_block(new_index, cached_block.hash()) {
                return Err(azurite_consensus_rules::BlockError::CheckpointMismatch.into());
            }
        } else {
            let pow_hash = self.pow.pow_hash(&cached_block.block().hashing_blob()?);
            check_block_pow(&pow_hash, block_difficulty)?;
        }

        // Contextual input verification, accumulating the spent set.
        let mut validator_state = ValidatorState::default();
        for entry in entries {
            let tx = entry.transaction();
            check_transaction_inputs(&self.cache, &self.ring_verifier, tx)?;
            for image in tx.key_images() {
                if !validator_state.spent_key_images.insert(*image) {
                    return Err(CoreError::DoubleSpend(*image));
                }
            }
        }

        let spent_images: Vec<azurite_types::KeyImage> =
            validator_state.spent_key_images.iter().copied().collect();

        let cached_txs: Vec<CachedTransaction> = entries
            .iter()
            .map(|entry| entry.cached().clone())
            .collect();

        self.cache.push_block(
            cached_block,
            &cached_txs,
            validator_state,
            cumulative_size as u64,
            generated_coins,
            block_difficulty,
            raw_block,
        )?;

        tracing::info!(
            index = new_index,
            block = %cached_block.hash(),
            transactions = entries.len() + 1,
            "block added to main chain"
        );
        Ok(spent_images)
    }

    //------------------------------------------------ Alternative blocks

    fn handle_alt_block(
        &mut self,
        cached_block: CachedBlock,
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<BlockAddResult, CoreError> {
        let block = cached_block.block();
        let previous = block.header.previous;
        let top = self.cache.top_block_index()?;

        // Locate the parent on either chain.
        let (parent_height, parent_cumulative) = match self.cache.block_index(&previous) {
            Ok(index) => (index, self.cache.block_info(index)?.cumulative_difficulty),
            Err(azurite_blockchain::CacheError::NotFound) => match self.alt_blocks.get(&previous)
            {
                Some(alt) => (alt.height, alt.cumulative_difficulty),
                None => return Err(CoreError::Orphan(previous)),
            },
            Err(e) => return Err(e.into()),
        };
        let height = parent_height + 1;

        if top.saturating_sub(height) > self.currency.alt_block_depth_limit() {
            return Err(CoreError::AltBlockTooDeep { height, top });
        }
        if !self.checkpoints.is_alternative_block_allowed(top, height) {
            return Err(CoreError::ReorgBelowCheckpoint(
                self.checkpoints.top_checkpoint_index().unwrap_or(0),
            ));
        }

        check_block_version(self.expected_major_version(height), block)?;

        // A cheap coinbase sanity check; the full check runs when the
        // branch is applied.
        match block.coinbase.inputs.as_slice() {
            [azurite_types::TransactionInput::Coinbase { height: h }] if *h == height => {}
            _ => return Err(azurite_consensus_rules::MinerTxError::InputHeightIncorrect.into()),
        }

        // Difficulty over this branch's own tail.
        let (timestamps, difficulties) = self.alt_difficulty_context(&previous)?;
        let block_difficulty = next_difficulty(&self.currency, timestamps, difficulties);
        let pow_hash = self.pow.pow_hash(&cached_block.block().hashing_blob()?);
        check_block_pow(&pow_hash, block_difficulty)?;

        // The alternative block's transactions must be available for a
        // later reorg; the pool holds them.
        let mut tx_blobs = Vec::with_capacity(block.transaction_hashes.len());
        for hash in &block.transaction_hashes {
            let entry = pool.get(hash).ok_or(CoreError::MissingPoolTx(*hash))?;
            tx_blobs.push(entry.cached().blob().to_vec());
        }

        let cumulative_difficulty = parent_cumulative + block_difficulty;
        let hash = *cached_block.hash();
        let raw_block = RawBlock {
            block: cached_block.blob().to_vec(),
            transactions: tx_blobs,
        };

        tracing::info!(
            block = %hash,
            height,
            cumulative_difficulty,
            "block added to alternative chain"
        );
        self.alt_blocks.insert(
            hash,
            AltChainBlock {
                cached_block,
                raw_block,
                height,
                cumulative_difficulty,
            },
        );

        let main_cumulative = self.cache.block_info(top)?.cumulative_difficulty;
        if cumulative_difficulty > main_cumulative {
            self.reorganize(&hash, pool, now)?;
            return Ok(BlockAddResult::Reorganized);
        }

        Ok(BlockAddResult::AddedToAltChain)
    }

    /// Timestamps and cumulative difficulties of the branch ending at
    /// `parent_hash`, oldest first, spanning the retarget window.
    fn alt_difficulty_context(
        &self,
        parent_hash: &Hash,
    ) -> Result<(Vec<u64>, Vec<Difficulty>), CoreError> {
        let count = self.currency.difficulty_blocks_count();

        // Newest first while walking the alternative segment.
        let mut alt_timestamps = Vec::new();
        let mut alt_difficulties = Vec::new();
        let mut cursor = *parent_hash;
        while let Some(alt) = self.alt_blocks.get(&cursor) {
            if alt_timestamps.len() == count {
                break;
            }
            alt_timestamps.push(alt.cached_block.block().header.timestamp);
            alt_difficulties.push(alt.cumulative_difficulty);
            cursor = alt.cached_block.block().header.previous;
        }

        // `cursor` is now on the main chain (or the walk filled the
        // window). Prepend the main-chain tail below the fork.
        let mut timestamps;
        let mut difficulties;
        if alt_timestamps.len() < count {
            let remaining = count - alt_timestamps.len();
            let fork_index = match self.cache.block_index(&cursor) {
                Ok(index) => index,
                Err(azurite_blockchain::CacheError::NotFound) => {
                    return Err(CoreError::Orphan(cursor));
                }
                Err(e) => return Err(e.into()),
            };
            timestamps = self.cache.last_timestamps(remaining, fork_index, true)?;
            difficulties = self
                .cache
                .last_cumulative_difficulties(remaining, fork_index, true)?;
        } else {
            timestamps = Vec::new();
            difficulties = Vec::new();
        }

        timestamps.extend(alt_timestamps.into_iter().rev());
        difficulties.extend(alt_difficulties.into_iter().rev());
        Ok((timestamps, difficulties))
    }

    //------------------------------------------------ Reorganization

    /// Switch the main chain to the alternative branch ending at
    /// `tip_hash`. On failure the previous main chain is restored and
    /// the bad tip is discarded.
    fn reorganize(
        &mut self,
        tip_hash: &Hash,
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<(), CoreError> {
        // Collect the branch tip → fork, then flip it oldest first.
        let mut branch: Vec<Hash> = Vec::new();
        let mut cursor = *tip_hash;
        let fork_parent_index = loop {
            let Some(alt) = self.alt_blocks.get(&cursor) else {
                match self.cache.block_index(&cursor) {
                    Ok(index) => break index,
                    Err(azurite_blockchain::CacheError::NotFound) => {
                        return Err(CoreError::Orphan(cursor));
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            branch.push(cursor);
            cursor = alt.cached_block.block().header.previous;
        };
        branch.reverse();

        let split_index = fork_parent_index + 1;
        let old_top = self.cache.top_block_index()?;
        if !self
            .checkpoints
            .is_alternative_block_allowed(old_top, split_index)
        {
            return Err(CoreError::ReorgBelowCheckpoint(
                self.checkpoints.top_checkpoint_index().unwrap_or(0),
            ));
        }

        tracing::info!(
            split_index,
            old_top,
            branch_len = branch.len(),
            "reorganizing onto heavier alternative chain"
        );

        // Detach the current suffix and hand its transactions back to
        // the pool.
        let segment = self.cache.split(split_index)?;
        for index in (split_index..=old_top).rev() {
            self.upgrade_manager.block_popped(index);
        }
        self.return_segment_transactions(&segment, pool, now);

        // Apply the branch through the regular append path.
        let result = self.apply_alt_branch(&branch, pool, now);

        match result {
            Ok(()) => {
                // The displaced blocks become alternative entries.
                self.adopt_segment_as_alternative(&segment, fork_parent_index)?;
                for hash in &branch {
                    self.alt_blocks.remove(hash);
                }
                tracing::info!(
                    new_top = self.cache.top_block_index()?,
                    "reorganization complete"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "reorganization failed, restoring previous chain");
                let spent_images: Vec<azurite_types::KeyImage> = segment
                    .blocks
                    .iter()
                    .flat_map(|pushed| pushed.validator_state.spent_key_images.iter().copied())
                    .collect();
                self.restore_segment(segment, split_index)?;
                // The restored blocks' spends must not linger in the
                // pool.
                pool.remove_spending(&spent_images);
                self.alt_blocks.remove(tip_hash);
                Err(e)
            }
        }
    }

    fn apply_alt_branch(
        &mut self,
        branch: &[Hash],
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<(), CoreError> {
        for hash in branch {
            let alt = self.alt_blocks.get(hash).cloned().ok_or_else(|| {
                azurite_blockchain::CacheError::InvariantViolation(
                    "alternative branch entry vanished during reorg",
                )
            })?;

            // The branch carried its transactions; make sure the pool
            // can hand them to the append path.
            let validator = ChainInputValidator {
                cache: &self.cache,
                verifier: &self.ring_verifier,
            };
            for blob in &alt.raw_block.transactions {
                let cached = CachedTransaction::from_blob(blob.clone())?;
                if !pool.contains(cached.hash()) {
                    drop(pool.add_transaction(cached, true, &validator, now));
                }
            }

            self.push_main_block(&alt.cached_block, pool, now)?;
        }
        Ok(())
    }

    fn return_segment_transactions(
        &self,
        segment: &SplitSegment,
        pool: &mut TransactionPool,
        now: u64,
    ) {
        let validator = ChainInputValidator {
            cache: &self.cache,
            verifier: &self.ring_verifier,
        };
        for pushed in &segment.blocks {
            for blob in &pushed.raw_block.transactions {
                let Ok(cached) = CachedTransaction::from_blob(blob.clone()) else {
                    continue;
                };
                let hash = *cached.hash();
                match pool.add_transaction(cached, true, &validator, now) {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(tx = %hash, error = %e, "popped transaction not reabsorbed");
                    }
                }
            }
        }
    }

    /// Undo a failed branch application: wipe whatever partially
    /// landed and re-push the saved suffix verbatim.
    fn restore_segment(
        &mut self,
        segment: SplitSegment,
        split_index: BlockIndex,
    ) -> Result<(), CoreError> {
        if self.cache.top_block_index()? >= split_index {
            self.cache.split(split_index)?;
        }

        for pushed in segment.blocks {
            let cached = CachedBlock::from_blob(pushed.raw_block.block.clone())?;
            let header = cached.block().header;
            let index = self.cache.top_block_index()? + 1;
            self.cache.push_stored_block(pushed)?;
            self.upgrade_manager
                .block_pushed(index, header.major_version, header.minor_version);
        }
        Ok(())
    }

    /// File the just-displaced main-chain suffix under the alternative
    /// map so it can win back later.
    fn adopt_segment_as_alternative(
        &mut self,
        segment: &SplitSegment,
        fork_parent_index: BlockIndex,
    ) -> Result<(), CoreError> {
        let mut cumulative = self
            .cache
            .block_info(fork_parent_index)?
            .cumulative_difficulty;

        for (offset, pushed) in segment.blocks.iter().enumerate() {
            cumulative += pushed.block_difficulty;
            let cached_block = CachedBlock::from_blob(pushed.raw_block.block.clone())?;
            let hash = *cached_block.hash();
            self.alt_blocks.insert(
                hash,
                AltChainBlock {
                    cached_block,
                    raw_block: pushed.raw_block.clone(),
                    height: segment.start_index + offset as u32,
                    cumulative_difficulty: cumulative,
                },
            );
        }
        Ok(())
    }

    /// Pop `count` blocks from the top of the main chain, returning
    /// their still-valid transactions to the pool. The popped blocks
    /// are kept as alternative entries so the discarded branch can win
    /// back.
    pub fn pop_blocks(
        &mut self,
        count: u32,
        pool: &mut TransactionPool,
        now: u64,
    ) -> Result<BlockIndex, CoreError> {
        let top = self.cache.top_block_index()?;
        if count == 0 || count > top {
            return Err(azurite_blockchain::CacheError::InvariantViolation(
                "cannot pop zero blocks or the genesis",
            )
            .into());
        }

        let split_index = top - count + 1;
        if !self
            .checkpoints
            .is_alternative_block_allowed(top, split_index)
        {
            return Err(CoreError::ReorgBelowCheckpoint(
                self.checkpoints.top_checkpoint_index().unwrap_or(0),
            ));
        }

        let segment = self.cache.split(split_index)?;
        for index in (split_index..=top).rev() {
            self.upgrade_manager.block_popped(index);
        }
        self.return_segment_transactions(&segment, pool, now);
        self.adopt_segment_as_alternative(&segment, split_index - 1)?;

        self.cache.top_block_index().map_err(CoreError::from)
    }

    //------------------------------------------------ Housekeeping

    /// Drop alternative blocks that fell below the depth budget.
    pub fn prune_alt_blocks(&mut self) -> Result<usize, CoreError> {
        let top = self.cache.top_block_index()?;
        let limit = self.currency.alt_block_depth_limit();
        let before = self.alt_blocks.len();
        self.alt_blocks
            .retain(|_, alt| top.saturating_sub(alt.height) <= limit);
        Ok(before - self.alt_blocks.len())
    }

    pub fn alt_blocks_count(&self) -> usize {
        self.alt_blocks.len()
    }
}
