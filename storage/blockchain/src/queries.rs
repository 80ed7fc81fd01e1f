//! The read side of the cache facade.

//---------------------------------------------------------------------------------------------------- Import
use rand::rngs::StdRng;
use rand::SeedableRng;

use azurite_database::Database;
use azurite_helper::time::{current_unix_timestamp, round_to_midnight, ONE_DAY_SECONDS};

use azurite_types::{
    Amount, BlockIndex, CachedBlock, Difficulty, GlobalOutputIndex, Hash, KeyImage, PaymentId,
    PublicKey, RawBlock,
};

use crate::{
    cache::BlockchainCache,
    error::{CacheError, ExtractOutputKeysError},
    read_batch::BlockchainReadBatch,
    shuffle::ShuffleGenerator,
    types::{CachedBlockInfo, ExtendedTransactionInfo, KeyOutputInfo, PackedOutputReference},
};

/// Disk reads for sliding windows happen this many records at a time.
const UNITS_CHUNK: usize = 128;

impl<D: Database> BlockchainCache<D> {
    //------------------------------------------------ Blocks

    pub fn block_hash(&self, index: BlockIndex) -> Result<Hash, CacheError> {
        Ok(self.block_info(index)?.block_hash)
    }

    pub fn block_index(&self, hash: &Hash) -> Result<BlockIndex, CacheError> {
        if *hash == self.top_block_hash()? {
            return Ok(self.top_block_index()?);
        }
        let result = self.read(BlockchainReadBatch::new().request_block_index_by_block_hash(hash))?;
        result
            .block_indexes_by_hash()
            .get(hash)
            .copied()
            .ok_or(CacheError::NotFound)
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, CacheError> {
        match self.block_index(hash) {
            Ok(_) => Ok(true),
            Err(CacheError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The exact bytes the block was stored with, for rebroadcast.
    pub fn raw_block(&self, index: BlockIndex) -> Result<RawBlock, CacheError> {
        let mut result = self.read(BlockchainReadBatch::new().request_raw_block(index))?;
        result
            .take_raw_blocks()
            .remove(&index)
            .ok_or(CacheError::NotFound)
    }

    /// Parsed block at `index`, reconstructed from the raw blob.
    pub fn block_by_index(&self, index: BlockIndex) -> Result<CachedBlock, CacheError> {
        let raw = self.raw_block(index)?;
        Ok(CachedBlock::from_blob(raw.block)?)
    }

    pub fn transaction_hashes_by_block(
        &self,
        index: BlockIndex,
    ) -> Result<Vec<Hash>, CacheError> {
        let result =
            self.read(BlockchainReadBatch::new().request_transaction_hashes_by_block(index))?;
        result
            .transaction_hashes_by_block()
            .get(&index)
            .cloned()
            .ok_or(CacheError::NotFound)
    }

    //------------------------------------------------ Transactions

    pub fn has_transaction(&self, hash: &Hash) -> Result<bool, CacheError> {
        let result = self.read(BlockchainReadBatch::new().request_cached_transaction(hash))?;
        Ok(result.cached_transactions().contains_key(hash))
    }

    pub fn transaction_info(&self, hash: &Hash) -> Result<ExtendedTransactionInfo, CacheError> {
        let result = self.read(BlockchainReadBatch::new().request_cached_transaction(hash))?;
        result
            .cached_transactions()
            .get(hash)
            .cloned()
            .ok_or(CacheError::NotFound)
    }

    /// The per-output global indexes assigned when the transaction was
    /// appended.
    pub fn transaction_global_indexes(
        &self,
        hash: &Hash,
    ) -> Result<Vec<GlobalOutputIndex>, CacheError> {
        Ok(self.transaction_info(hash)?.global_indexes)
    }

    /// Raw transaction blobs for `hashes`; unknown hashes land in the
    /// missed list. The coinbase is re-serialized from the parsed
    /// block, other transactions are picked out of the raw block's
    /// blob list.
    pub fn raw_transactions(
        &self,
        hashes: &[Hash],
    ) -> Result<(Vec<Vec<u8>>, Vec<Hash>), CacheError> {
        let mut batch = BlockchainReadBatch::new();
        for hash in hashes {
            batch = batch.request_cached_transaction(hash);
        }
        let infos = self.read(batch)?;

        let mut block_batch = BlockchainReadBatch::new();
        for info in infos.cached_transactions().values() {
            block_batch = block_batch.request_raw_block(info.block_index);
        }
        let blocks = self.read(block_batch)?;

        let mut found = Vec::with_capacity(hashes.len());
        let mut missed = Vec::new();
        for hash in hashes {
            let Some(info) = infos.cached_transactions().get(hash) else {
                missed.push(*hash);
                continue;
            };
            let Some(raw) = blocks.raw_blocks().get(&info.block_index) else {
                missed.push(*hash);
                continue;
            };

            if info.transaction_index == 0 {
                let block = CachedBlock::from_blob(raw.block.clone())?;
                found.push(azurite_types::to_blob(&block.block().coinbase)?);
            } else {
                let blob = raw
                    .transactions
                    .get(info.transaction_index as usize - 1)
                    .ok_or(CacheError::InvariantViolation(
                        "transaction index points past the raw block's blob list",
                    ))?;
                found.push(blob.clone());
            }
        }
        Ok((found, missed))
    }

    //------------------------------------------------ Spent key images

    /// True iff the key image is recorded spent at a block index at or
    /// below `upto_index`.
    pub fn is_spent(&self, key_image: &KeyImage, upto_index: BlockIndex) -> Result<bool, CacheError> {
        let result =
            self.read(BlockchainReadBatch::new().request_block_index_by_spent_key_image(key_image))?;
        Ok(result
            .block_indexes_by_key_image()
            .get(key_image)
            .is_some_and(|&index| index <= upto_index))
    }

    pub fn is_spent_at_top(&self, key_image: &KeyImage) -> Result<bool, CacheError> {
        let top = self.top_block_index()?;
        self.is_spent(key_image, top)
    }

    //------------------------------------------------ Sliding windows

    /// Up to `count` block timestamps ending at `upto_index`, oldest
    /// first.
    pub fn last_timestamps(
        &self,
        count: usize,
        upto_index: BlockIndex,
        include_genesis: bool,
    ) -> Result<Vec<u64>, CacheError> {
        self.last_units(count, upto_index, include_genesis, |info| info.timestamp)
    }

    /// Up to `count` cumulative difficulties ending at `upto_index`,
    /// oldest first.
    pub fn last_cumulative_difficulties(
        &self,
        count: usize,
        upto_index: BlockIndex,
        include_genesis: bool,
    ) -> Result<Vec<Difficulty>, CacheError> {
        self.last_units(count, upto_index, include_genesis, |info| {
            info.cumulative_difficulty
        })
    }

    /// Up to `count` block sizes ending at `upto_index`, oldest first.
    pub fn last_block_sizes(
        &self,
        count: usize,
        upto_index: BlockIndex,
        include_genesis: bool,
    ) -> Result<Vec<u64>, CacheError> {
        self.last_units(count, upto_index, include_genesis, |info| {
            u64::from(info.block_size)
        })
    }

    fn last_units<F: Fn(&CachedBlockInfo) -> u64>(
        &self,
        count: usize,
        upto_index: BlockIndex,
        include_genesis: bool,
        unit: F,
    ) -> Result<Vec<u64>, CacheError> {
        let first_allowed: BlockIndex = u32::from(!include_genesis);
        if upto_index < first_allowed || count == 0 {
            return Ok(Vec::new());
        }

        let span = count.min((upto_index - first_allowed) as usize + 1);
        let start = upto_index as usize + 1 - span;

        let mut units = Vec::with_capacity(span);
        let mut index = start;
        while index <= upto_index as usize {
            // The window covers recent heights; serve the rest from
            // disk a chunk at a time.
            if let Some(info) = self.window_get(index as BlockIndex) {
                units.push(unit(&info));
                index += 1;
                continue;
            }

            let chunk_end = (index + UNITS_CHUNK).min(upto_index as usize + 1);
            let mut batch = BlockchainReadBatch::new();
            for i in index..chunk_end {
                batch = batch.request_cached_block(i as BlockIndex);
            }
            let result = self.read(batch)?;
            for i in index..chunk_end {
                let info = result.cached_blocks().get(&(i as BlockIndex)).ok_or(
                    CacheError::InvariantViolation("main chain has a gap below the top block"),
                )?;
                units.push(unit(info));
            }
            index = chunk_end;
        }

        Ok(units)
    }

    //------------------------------------------------ Key outputs

    pub fn key_outputs_count_for_amount(&self, amount: Amount) -> Result<u32, CacheError> {
        if let Some(&count) = self.key_output_counts.borrow().get(&amount) {
            return Ok(count);
        }
        let result =
            self.read(BlockchainReadBatch::new().request_key_output_count_for_amount(amount))?;
        let count = result.key_output_counts().get(&amount).copied().unwrap_or(0);
        self.key_output_counts.borrow_mut().insert(amount, count);
        Ok(count)
    }

    pub fn key_output(
        &self,
        amount: Amount,
        global_index: GlobalOutputIndex,
    ) -> Result<PackedOutputReference, CacheError> {
        let result = self.read(
            BlockchainReadBatch::new().request_key_output_global_index_for_amount(amount, global_index),
        )?;
        result
            .key_output_global_indexes()
            .get(&(amount, global_index))
            .copied()
            .ok_or(CacheError::NotFound)
    }

    /// How many outputs of `amount` sit in blocks at or below
    /// `block_index`: a binary search over the dense global index,
    /// fetching one [`PackedOutputReference`] per probe.
    pub fn key_outputs_count_at_or_before(
        &self,
        amount: Amount,
        block_index: BlockIndex,
    ) -> Result<u32, CacheError> {
        let count = self.key_outputs_count_for_amount(amount)?;

        let (mut lo, mut hi) = (0_u32, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let reference = self.key_output(amount, mid)?;
            if reference.block_index <= block_index {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// For each requested global index: check the output is unlocked
    /// at `upto_block_index` and return its one-time key, in request
    /// order.
    pub fn extract_key_output_keys(
        &self,
        amount: Amount,
        global_indexes: &[GlobalOutputIndex],
        upto_block_index: BlockIndex,
    ) -> Result<Vec<PublicKey>, ExtractOutputKeysError> {
        let count = self.key_outputs_count_for_amount(amount)?;
        if global_indexes.iter().any(|&index| index >= count) {
            return Err(ExtractOutputKeysError::InvalidGlobalIndex);
        }

        let mut batch = BlockchainReadBatch::new();
        for &index in global_indexes {
            batch = batch.request_key_output_info(amount, index);
        }
        let result = self.read(batch).map_err(ExtractOutputKeysError::from)?;

        let now = current_unix_timestamp();
        let mut keys = Vec::with_capacity(global_indexes.len());
        for &index in global_indexes {
            let info: &KeyOutputInfo = result
                .key_output_info()
                .get(&(amount, index))
                .ok_or(ExtractOutputKeysError::InvalidGlobalIndex)?;
            if !self
                .currency
                .is_unlocked(info.unlock_time, upto_block_index, now)
            {
                tracing::debug!(amount, index, "requested key output is locked");
                return Err(ExtractOutputKeysError::OutputLocked);
            }
            keys.push(info.public_key);
        }
        Ok(keys)
    }

    /// Draw up to `count` distinct unlocked global indexes of
    /// `amount`, usable as ring members at `upto_block_index`.
    /// Exhausting the supply caps the result rather than failing.
    pub fn random_unlocked_outputs(
        &self,
        amount: Amount,
        count: usize,
        upto_block_index: BlockIndex,
    ) -> Result<Vec<GlobalOutputIndex>, CacheError> {
        self.random_unlocked_outputs_with_rng(
            amount,
            count,
            upto_block_index,
            StdRng::from_entropy(),
        )
    }

    pub(crate) fn random_unlocked_outputs_with_rng<R: rand::Rng>(
        &self,
        amount: Amount,
        count: usize,
        upto_block_index: BlockIndex,
        rng: R,
    ) -> Result<Vec<GlobalOutputIndex>, CacheError> {
        let outputs_count = self.key_outputs_count_for_amount(amount)?;
        let mut to_pick = count.min(outputs_count as usize);

        let mut generator = ShuffleGenerator::new(outputs_count, rng);
        let mut picked = Vec::with_capacity(to_pick);

        // Coinbase maturity: outputs in the trailing unlock window are
        // not usable as ring members yet.
        let upper_block_index =
            upto_block_index.saturating_sub(self.currency.mined_money_unlock_window());
        let now = current_unix_timestamp();

        while to_pick > 0 {
            let candidates: Vec<GlobalOutputIndex> = generator.by_ref().take(to_pick).collect();
            if candidates.is_empty() {
                tracing::trace!(amount, "random output draw exhausted the supply");
                break;
            }

            let mut batch = BlockchainReadBatch::new();
            for &index in &candidates {
                batch = batch
                    .request_key_output_global_index_for_amount(amount, index)
                    .request_key_output_info(amount, index);
            }
            let result = self.read(batch)?;

            for &index in &candidates {
                let (Some(reference), Some(info)) = (
                    result.key_output_global_indexes().get(&(amount, index)),
                    result.key_output_info().get(&(amount, index)),
                ) else {
                    return Err(CacheError::InvariantViolation(
                        "dense key output index has a hole",
                    ));
                };

                if !self
                    .currency
                    .is_unlocked(info.unlock_time, upto_block_index, now)
                    || reference.block_index > upper_block_index
                {
                    continue;
                }

                picked.push(index);
                to_pick -= 1;
            }
        }

        Ok(picked)
    }

    //------------------------------------------------ Payment ids

    /// All transaction hashes tagged with `payment_id`, in insertion
    /// order.
    pub fn transactions_by_payment_id(
        &self,
        payment_id: &PaymentId,
    ) -> Result<Vec<Hash>, CacheError> {
        let counts = self.read(
            BlockchainReadBatch::new().request_transaction_count_by_payment_id(payment_id),
        )?;
        let Some(&count) = counts.transaction_counts_by_payment_id().get(payment_id) else {
            return Ok(Vec::new());
        };

        let mut batch = BlockchainReadBatch::new();
        for index in 0..count {
            batch = batch.request_transaction_hash_by_payment_id(payment_id, index);
        }
        let result = self.read(batch)?;

        let mut hashes = Vec::with_capacity(count as usize);
        for index in 0..count {
            let hash = result
                .transaction_hashes_by_payment_id()
                .get(&(*payment_id, index))
                .ok_or(CacheError::InvariantViolation(
                    "payment id count does not match its records",
                ))?;
            hashes.push(*hash);
        }
        Ok(hashes)
    }

    pub fn transactions_count_by_payment_id(
        &self,
        payment_id: &PaymentId,
    ) -> Result<u32, CacheError> {
        let counts = self.read(
            BlockchainReadBatch::new().request_transaction_count_by_payment_id(payment_id),
        )?;
        Ok(counts
            .transaction_counts_by_payment_id()
            .get(payment_id)
            .copied()
            .unwrap_or(0))
    }

    //------------------------------------------------ Timestamps

    /// Hashes of blocks whose timestamp falls in
    /// `[timestamp_begin, timestamp_begin + seconds_count)`.
    pub fn block_hashes_by_timestamps(
        &self,
        timestamp_begin: u64,
        seconds_count: usize,
    ) -> Result<Vec<Hash>, CacheError> {
        let mut hashes = Vec::new();
        if seconds_count == 0 {
            return Ok(hashes);
        }

        let mut batch = BlockchainReadBatch::new();
        for timestamp in timestamp_begin..timestamp_begin + seconds_count as u64 {
            batch = batch.request_block_hashes_by_timestamp(timestamp);
        }
        let result = self.read(batch)?;

        for timestamp in timestamp_begin..timestamp_begin + seconds_count as u64 {
            if let Some(found) = result.block_hashes_by_timestamp().get(&timestamp) {
                hashes.extend_from_slice(found);
            }
        }
        Ok(hashes)
    }

    /// The first main-chain block of the day containing `timestamp`,
    /// stepping one day back at a time until a record exists; 0 when
    /// the chain is younger than any record.
    pub fn timestamp_lower_bound_block_index(
        &self,
        timestamp: u64,
    ) -> Result<BlockIndex, CacheError> {
        let mut midnight = round_to_midnight(timestamp);

        loop {
            let result = self
                .read(BlockchainReadBatch::new().request_closest_timestamp_block_index(midnight))?;
            if let Some(&index) = result.closest_timestamp_block_index().get(&midnight) {
                return Ok(index);
            }
            if midnight < ONE_DAY_SECONDS {
                return Ok(0);
            }
            midnight -= ONE_DAY_SECONDS;
        }
    }
}
