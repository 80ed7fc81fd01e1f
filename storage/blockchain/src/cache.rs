//! The blockchain cache facade: the single owner of the persistent
//! schema.
//!
//! All mutation goes through [`BlockchainCache::push_block`] and
//! [`BlockchainCache::split`]; both assemble one write batch and
//! commit it atomically, and only then touch the in-memory caches, so
//! a failed commit leaves every index and cache untouched.

//---------------------------------------------------------------------------------------------------- Import
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use azurite_consensus_rules::Currency;
use azurite_database::Database;
use azurite_types::{
    Amount, BlockIndex, CachedBlock, CachedTransaction, Difficulty, Hash, RawBlock,
    TransactionOutputTarget,
};
use azurite_helper::time::round_to_midnight;

use crate::{
    error::CacheError,
    read_batch::{BlockchainReadBatch, BlockchainReadResult},
    rebuild,
    types::{
        CachedBlockInfo, ExtendedTransactionInfo, KeyOutputInfo, PackedOutputReference,
        ValidatorState,
    },
    write_batch::BlockchainWriteBatch,
    DB_SCHEME_VERSION,
};

//---------------------------------------------------------------------------------------------------- Constants
/// How many recent [`CachedBlockInfo`]s stay in memory to spare disk
/// round-trips for the windows consensus keeps asking about.
pub const BLOCK_INFO_WINDOW: usize = 1000;

//---------------------------------------------------------------------------------------------------- PendingCounts
/// Count mutations staged while a write batch is being assembled.
/// Merged into the live caches only after the batch commits, so a
/// failed commit can simply drop them.
#[derive(Debug, Default)]
pub(crate) struct PendingCounts {
    pub(crate) key_output_counts: HashMap<Amount, u32>,
    pub(crate) payment_id_counts: HashMap<azurite_types::PaymentId, u32>,
    pub(crate) amounts_count: Option<u32>,
    pub(crate) transactions_count: Option<u64>,
}

//---------------------------------------------------------------------------------------------------- BlockchainCache
/// The persistent blockchain cache over a raw KV database.
pub struct BlockchainCache<D> {
    pub(crate) currency: Arc<Currency>,
    pub(crate) db: D,

    // Lazily-populated scalars; `None` means "ask the store".
    pub(crate) top_block_index: Cell<Option<BlockIndex>>,
    pub(crate) top_block_hash: Cell<Option<Hash>>,
    pub(crate) transactions_count: Cell<Option<u64>>,
    pub(crate) key_output_amounts_count: Cell<Option<u32>>,

    /// Per-amount key output counts, hot during block append.
    pub(crate) key_output_counts: RefCell<HashMap<Amount, u32>>,

    /// Recent block infos, oldest at the front; covers
    /// `top + 1 - len ..= top`.
    pub(crate) window: RefCell<VecDeque<CachedBlockInfo>>,
}

impl<D: Database> BlockchainCache<D> {
    /// Open the cache, writing the schema version on first use,
    /// rebuilding the indexes when the store is older, and refusing
    /// stores newer than this build. An empty store gets the genesis
    /// block.
    pub fn open(currency: Arc<Currency>, db: D) -> Result<Self, CacheError> {
        match rebuild::stored_scheme_version(&db)? {
            None => {
                tracing::debug!(version = DB_SCHEME_VERSION, "writing DB scheme version");
                let mut batch = BlockchainWriteBatch::new();
                batch.insert_db_scheme_version(DB_SCHEME_VERSION)?;
                db.write(batch)?;
            }
            Some(version) if version < DB_SCHEME_VERSION => {
                tracing::warn!(
                    found = version,
                    expected = DB_SCHEME_VERSION,
                    "DB scheme version is older than expected, rebuilding indexes from raw blocks"
                );
                rebuild::rebuild_from_raw_blocks(&currency, &db)?;
            }
            Some(version) if version > DB_SCHEME_VERSION => {
                return Err(CacheError::SchemeVersionTooNew {
                    found: version,
                    supported: DB_SCHEME_VERSION,
                });
            }
            Some(version) => {
                tracing::debug!(version, "DB scheme version matches");
            }
        }

        let cache = Self {
            currency,
            db,
            top_block_index: Cell::new(None),
            top_block_hash: Cell::new(None),
            transactions_count: Cell::new(None),
            key_output_amounts_count: Cell::new(None),
            key_output_counts: RefCell::new(HashMap::new()),
            window: RefCell::new(VecDeque::new()),
        };

        let result = cache.read(BlockchainReadBatch::new().request_last_block_index())?;
        if !result.last_block_index().1 {
            tracing::debug!("store is empty, adding the genesis block");
            cache.add_genesis_block()?;
        }

        cache.fill_window()?;
        Ok(cache)
    }

    /// Borrow the underlying database.
    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub(crate) fn read(
        &self,
        mut batch: BlockchainReadBatch,
    ) -> Result<BlockchainReadResult, CacheError> {
        self.db.read(&mut batch)?;
        Ok(batch.extract_result()?)
    }

    //------------------------------------------------ Genesis

    fn add_genesis_block(&self) -> Result<(), CacheError> {
        let genesis = self.currency.genesis_block().clone();
        let generated_coins = genesis
            .block()
            .coinbase
            .outputs_amount()
            .ok_or(CacheError::InvariantViolation("genesis coinbase overflows"))?;
        let raw_block = RawBlock {
            block: genesis.blob().to_vec(),
            transactions: vec![],
        };
        let block_size = raw_block.size() as u64;

        self.push_block_at(
            None,
            &genesis,
            &[],
            ValidatorState::default(),
            block_size,
            generated_coins,
            1,
            raw_block,
        )
    }

    //------------------------------------------------ Push

    /// Append a fully validated block on top of the chain.
    ///
    /// `transactions` are the block's non-coinbase transactions in
    /// block order; `validator_state` carries the key images input
    /// verification collected.
    #[allow(clippy::too_many_arguments)]
    pub fn push_block(
        &mut self,
        cached_block: &CachedBlock,
        transactions: &[CachedTransaction],
        validator_state: ValidatorState,
        block_size: u64,
        generated_coins: u64,
        block_difficulty: Difficulty,
        raw_block: RawBlock,
    ) -> Result<(), CacheError> {
        let top = self.top_block_index()?;
        let parent = self.block_info(top)?;
        self.push_block_at(
            Some((top, parent)),
            cached_block,
            transactions,
            validator_state,
            block_size,
            generated_coins,
            block_difficulty,
            raw_block,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_block_at(
        &self,
        parent: Option<(BlockIndex, CachedBlockInfo)>,
        cached_block: &CachedBlock,
        transactions: &[CachedTransaction],
        validator_state: ValidatorState,
        block_size: u64,
        generated_coins: u64,
        block_difficulty: Difficulty,
        raw_block: RawBlock,
    ) -> Result<(), CacheError> {
        tracing::debug!(
            block = %cached_block.hash(),
            transactions = transactions.len() + 1,
            "push block"
        );

        let new_index = match &parent {
            Some((top, _)) => top + 1,
            None => 0,
        };

        let (cumulative_difficulty, already_generated_coins, already_generated_transactions) =
            match &parent {
                Some((_, info)) => (
                    info.cumulative_difficulty
                        .checked_add(block_difficulty)
                        .ok_or(CacheError::InvariantViolation(
                            "cumulative difficulty overflows",
                        ))?,
                    info.already_generated_coins + generated_coins,
                    info.already_generated_transactions + transactions.len() as u64 + 1,
                ),
                None => (block_difficulty, generated_coins, transactions.len() as u64 + 1),
            };

        let block_info = CachedBlockInfo {
            block_hash: *cached_block.hash(),
            timestamp: cached_block.block().header.timestamp,
            cumulative_difficulty,
            already_generated_coins,
            already_generated_transactions,
            block_size: block_size as u32,
        };

        let mut batch = BlockchainWriteBatch::new();
        let mut pending = PendingCounts::default();

        batch.insert_spent_key_images(new_index, &validator_state.spent_key_images)?;

        let coinbase = cached_block.cached_coinbase()?;
        let mut tx_hashes = Vec::with_capacity(1 + transactions.len());
        tx_hashes.push(*coinbase.hash());
        tx_hashes.extend_from_slice(&cached_block.block().transaction_hashes);

        batch.insert_cached_block(&block_info, new_index, &tx_hashes)?;
        batch.insert_raw_block(new_index, &raw_block)?;

        self.push_transaction(&mut batch, &mut pending, &coinbase, new_index, 0)?;
        for (offset, transaction) in transactions.iter().enumerate() {
            self.push_transaction(
                &mut batch,
                &mut pending,
                transaction,
                new_index,
                (offset + 1) as u16,
            )?;
        }

        let timestamp = cached_block.block().header.timestamp;
        let midnight = round_to_midnight(timestamp);
        let closest = self.read(
            BlockchainReadBatch::new().request_closest_timestamp_block_index(midnight),
        )?;
        if !closest.closest_timestamp_block_index().contains_key(&midnight) {
            batch.insert_closest_timestamp_block_index(midnight, new_index)?;
        }

        self.insert_block_timestamp(&mut batch, timestamp, cached_block.hash())?;

        self.db.write(batch)?;

        // The batch is on disk; now, and only now, move the caches.
        self.apply_pending(pending);
        self.top_block_index.set(Some(new_index));
        self.top_block_hash.set(Some(*cached_block.hash()));

        let mut window = self.window.borrow_mut();
        window.push_back(block_info);
        if window.len() > BLOCK_INFO_WINDOW {
            window.pop_front();
        }

        tracing::debug!(block = %cached_block.hash(), index = new_index, "push block completed");
        Ok(())
    }

    fn push_transaction(
        &self,
        batch: &mut BlockchainWriteBatch,
        pending: &mut PendingCounts,
        transaction: &CachedTransaction,
        block_index: BlockIndex,
        transaction_index: u16,
    ) -> Result<(), CacheError> {
        let tx = transaction.transaction();

        let mut info = ExtendedTransactionInfo {
            transaction: tx.clone(),
            transaction_hash: *transaction.hash(),
            block_index,
            transaction_index,
            unlock_time: tx.unlock_time,
            global_indexes: Vec::with_capacity(tx.outputs.len()),
            amount_to_key_indexes: Default::default(),
        };

        let mut key_references: HashMap<Amount, Vec<PackedOutputReference>> = HashMap::new();
        let mut new_amounts = Vec::new();

        for (output_index, output) in tx.outputs.iter().enumerate() {
            let reference = PackedOutputReference {
                block_index,
                transaction_index,
                output_index: output_index as u16,
            };

            let TransactionOutputTarget::Key(public_key) = output.target;

            let count_for_amount =
                self.update_key_output_count(pending, output.amount, 1, &mut new_amounts)?;
            let global_index = count_for_amount - 1;

            info.global_indexes.push(global_index);
            info.amount_to_key_indexes
                .entry(output.amount)
                .or_default()
                .push(global_index);
            key_references.entry(output.amount).or_default().push(reference);

            batch.insert_key_output_info(
                output.amount,
                global_index,
                &KeyOutputInfo {
                    public_key,
                    transaction_hash: *transaction.hash(),
                    output_index: output_index as u16,
                    unlock_time: tx.unlock_time,
                },
            )?;
        }

        // Deterministic batch layout: amounts ascending.
        let mut amounts: Vec<Amount> = key_references.keys().copied().collect();
        amounts.sort_unstable();
        for amount in amounts {
            let total = self.update_key_output_count(pending, amount, 0, &mut new_amounts)?;
            batch.insert_key_output_global_indexes(amount, &key_references[&amount], total)?;
        }

        if !new_amounts.is_empty() {
            let total = self.key_output_amounts_count_pending(pending)?;
            batch.insert_key_output_amounts(&new_amounts, total)?;
        }

        if let Some(payment_id) = azurite_types::payment_id_from_extra(&tx.extra) {
            let count = match pending.payment_id_counts.get(&payment_id) {
                Some(&count) => count,
                None => {
                    let counts = self.read(
                        BlockchainReadBatch::new()
                            .request_transaction_count_by_payment_id(&payment_id),
                    )?;
                    counts
                        .transaction_counts_by_payment_id()
                        .get(&payment_id)
                        .copied()
                        .unwrap_or(0)
                }
            };
            pending.payment_id_counts.insert(payment_id, count + 1);
            batch.insert_payment_id(transaction.hash(), &payment_id, count + 1)?;
        }

        let total_txs = self.transactions_count_pending(pending)? + 1;
        pending.transactions_count = Some(total_txs);
        batch.insert_cached_transaction(&info, total_txs)?;

        Ok(())
    }

    /// Apply `diff` to the per-amount key output count, pulling the
    /// current value from the pending set, the live cache, or the
    /// store, in that order. Newly-seen amounts are appended to
    /// `new_amounts` and bump the amount enumeration's scalar.
    pub(crate) fn update_key_output_count(
        &self,
        pending: &mut PendingCounts,
        amount: Amount,
        diff: i64,
        new_amounts: &mut Vec<Amount>,
    ) -> Result<u32, CacheError> {
        let current = match pending.key_output_counts.get(&amount) {
            Some(&count) => count,
            None => match self.key_output_counts.borrow().get(&amount) {
                Some(&count) => count,
                None => {
                    let result = self.read(
                        BlockchainReadBatch::new().request_key_output_count_for_amount(amount),
                    )?;
                    result.key_output_counts().get(&amount).copied().unwrap_or(0)
                }
            },
        };

        if current == 0 && diff > 0 {
            let amounts_count = self.key_output_amounts_count_pending(pending)?;
            pending.amounts_count = Some(amounts_count + 1);
            new_amounts.push(amount);
        }

        let updated = i64::from(current) + diff;
        let updated: u32 = updated.try_into().map_err(|_| {
            CacheError::InvariantViolation("key output count for amount went negative")
        })?;

        pending.key_output_counts.insert(amount, updated);
        Ok(updated)
    }

    pub(crate) fn key_output_amounts_count_pending(
        &self,
        pending: &mut PendingCounts,
    ) -> Result<u32, CacheError> {
        if let Some(count) = pending.amounts_count {
            return Ok(count);
        }
        let count = self.key_output_amounts_count()?;
        pending.amounts_count = Some(count);
        Ok(count)
    }

    fn transactions_count_pending(&self, pending: &mut PendingCounts) -> Result<u64, CacheError> {
        if let Some(count) = pending.transactions_count {
            return Ok(count);
        }
        let count = self.transactions_count()?;
        pending.transactions_count = Some(count);
        Ok(count)
    }

    pub(crate) fn apply_pending(&self, pending: PendingCounts) {
        let mut counts = self.key_output_counts.borrow_mut();
        for (amount, count) in pending.key_output_counts {
            if count == 0 {
                counts.remove(&amount);
            } else {
                counts.insert(amount, count);
            }
        }
        if let Some(count) = pending.amounts_count {
            self.key_output_amounts_count.set(Some(count));
        }
        if let Some(count) = pending.transactions_count {
            self.transactions_count.set(Some(count));
        }
    }

    pub(crate) fn insert_block_timestamp(
        &self,
        batch: &mut BlockchainWriteBatch,
        timestamp: u64,
        block_hash: &Hash,
    ) -> Result<(), CacheError> {
        let result =
            self.read(BlockchainReadBatch::new().request_block_hashes_by_timestamp(timestamp))?;
        let mut hashes = result
            .block_hashes_by_timestamp()
            .get(&timestamp)
            .cloned()
            .unwrap_or_default();
        hashes.push(*block_hash);
        batch.insert_timestamp(timestamp, &hashes)
    }

    //------------------------------------------------ Window

    pub(crate) fn fill_window(&self) -> Result<(), CacheError> {
        let top = self.top_block_index()?;
        let len = (top as usize + 1).min(BLOCK_INFO_WINDOW);
        let start = top as usize + 1 - len;

        let mut window = VecDeque::with_capacity(len);
        for chunk_start in (start..=top as usize).step_by(128) {
            let chunk_end = (chunk_start + 128).min(top as usize + 1);
            let mut batch = BlockchainReadBatch::new();
            for index in chunk_start..chunk_end {
                batch = batch.request_cached_block(index as BlockIndex);
            }
            let result = self.read(batch)?;
            for index in chunk_start..chunk_end {
                let info = result
                    .cached_blocks()
                    .get(&(index as BlockIndex))
                    .ok_or(CacheError::InvariantViolation(
                        "main chain has a gap below the top block",
                    ))?;
                window.push_back(info.clone());
            }
        }

        *self.window.borrow_mut() = window;
        Ok(())
    }

    /// Serve a block info from the window if the height is recent.
    pub(crate) fn window_get(&self, index: BlockIndex) -> Option<CachedBlockInfo> {
        let top = self.top_block_index.get()?;
        let window = self.window.borrow();
        let len = window.len() as u32;
        if index > top || top + 1 - len > index {
            return None;
        }
        window.get((index + len - 1 - top) as usize).cloned()
    }

    //------------------------------------------------ Cached scalars

    pub fn top_block_index(&self) -> Result<BlockIndex, CacheError> {
        if let Some(index) = self.top_block_index.get() {
            return Ok(index);
        }
        let result = self.read(BlockchainReadBatch::new().request_last_block_index())?;
        let (index, present) = result.last_block_index();
        let index = if present { index } else { 0 };
        self.top_block_index.set(Some(index));
        Ok(index)
    }

    pub fn top_block_hash(&self) -> Result<Hash, CacheError> {
        if let Some(hash) = self.top_block_hash.get() {
            return Ok(hash);
        }
        let top = self.top_block_index()?;
        let hash = self.block_info(top)?.block_hash;
        self.top_block_hash.set(Some(hash));
        Ok(hash)
    }

    pub fn block_count(&self) -> Result<u32, CacheError> {
        Ok(self.top_block_index()? + 1)
    }

    pub fn transactions_count(&self) -> Result<u64, CacheError> {
        if let Some(count) = self.transactions_count.get() {
            return Ok(count);
        }
        let result = self.read(BlockchainReadBatch::new().request_transactions_count())?;
        let (count, present) = result.transactions_count();
        let count = if present { count } else { 0 };
        self.transactions_count.set(Some(count));
        Ok(count)
    }

    pub fn key_output_amounts_count(&self) -> Result<u32, CacheError> {
        if let Some(count) = self.key_output_amounts_count.get() {
            return Ok(count);
        }
        let result = self.read(BlockchainReadBatch::new().request_key_output_amounts_count())?;
        let (count, present) = result.key_output_amounts_count();
        let count = if present { count } else { 0 };
        self.key_output_amounts_count.set(Some(count));
        Ok(count)
    }

    pub fn block_info(&self, index: BlockIndex) -> Result<CachedBlockInfo, CacheError> {
        if let Some(info) = self.window_get(index) {
            return Ok(info);
        }
        let result = self.read(BlockchainReadBatch::new().request_cached_block(index))?;
        result
            .cached_blocks()
            .get(&index)
            .cloned()
            .ok_or(CacheError::NotFound)
    }
}
