//! The pool proper: admission, eviction, template fill.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use azurite_consensus_rules::{
    transactions::check_transaction_statics, Currency, TransactionError,
};
use azurite_types::{BlockIndex, CachedTransaction, Hash, KeyImage, Transaction};

use crate::{priority::PriorityKey, template::BlockTemplate};

//---------------------------------------------------------------------------------------------------- TransactionValidator
/// The chain's side of pool admission.
pub trait TransactionValidator {
    /// Verify the transaction's inputs against the current chain.
    /// Success returns the highest main-chain block the inputs
    /// reference, which invalidates the check once it reorgs away.
    fn check_transaction_inputs(&self, tx: &Transaction) -> Option<(BlockIndex, Hash)>;

    /// Whether any of the transaction's key images is already spent
    /// on the main chain.
    fn have_spent_key_images(&self, tx: &Transaction) -> bool;
}

//---------------------------------------------------------------------------------------------------- Errors
#[derive(Debug, thiserror::Error)]
pub enum PoolAddError {
    #[error("transaction is already in the pool")]
    Duplicate,
    #[error("static validation failed: {0}")]
    Statics(#[from] TransactionError),
    #[error("transaction fee is below the minimum")]
    FeeTooLow,
    #[error("transaction double-spends a pool transaction")]
    DoubleSpend,
    #[error("transaction inputs failed chain validation")]
    InvalidInputs,
}

/// What admission decided about an accepted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedToPool {
    /// Paying transactions with verified inputs are worth gossiping.
    pub should_be_relayed: bool,
    /// Set for `kept_by_block` transactions whose inputs could not be
    /// verified against the current chain.
    pub verification_impossible: bool,
}

//---------------------------------------------------------------------------------------------------- PoolTransaction
/// One pool entry.
#[derive(Debug, Clone)]
pub struct PoolTransaction {
    cached: CachedTransaction,
    fee: u64,
    kept_by_block: bool,
    receive_time: u64,
    /// Highest chain block the last successful input check touched.
    max_used_block: Option<(BlockIndex, Hash)>,
    /// Chain top of the last failed re-check.
    last_failed_block: Option<(BlockIndex, Hash)>,
}

impl PoolTransaction {
    pub fn transaction(&self) -> &Transaction {
        self.cached.transaction()
    }

    pub fn cached(&self) -> &CachedTransaction {
        &self.cached
    }

    pub fn hash(&self) -> &Hash {
        self.cached.hash()
    }

    pub fn blob_size(&self) -> usize {
        self.cached.blob_size()
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn kept_by_block(&self) -> bool {
        self.kept_by_block
    }

    pub fn receive_time(&self) -> u64 {
        self.receive_time
    }

    fn priority_key(&self) -> PriorityKey {
        PriorityKey {
            fee: self.fee,
            blob_size: self.blob_size() as u64,
            receive_time: self.receive_time,
            hash: *self.hash(),
        }
    }
}

//---------------------------------------------------------------------------------------------------- TransactionPool
/// Unconfirmed transactions, indexed by hash and by fee density.
pub struct TransactionPool {
    currency: Arc<Currency>,
    /// Primary index, in arrival order.
    transactions: IndexMap<Hash, PoolTransaction>,
    /// Secondary index; iteration yields the fee-density order.
    priority: BTreeSet<PriorityKey>,
    /// Key images referenced by any pool transaction.
    spent_key_images: HashMap<KeyImage, Hash>,
}

impl TransactionPool {
    pub fn new(currency: Arc<Currency>) -> Self {
        Self {
            currency,
            transactions: IndexMap::new(),
            priority: BTreeSet::new(),
            spent_key_images: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&PoolTransaction> {
        self.transactions.get(hash)
    }

    /// Pool transaction hashes in arrival order.
    pub fn transaction_hashes(&self) -> Vec<Hash> {
        self.transactions.keys().copied().collect()
    }

    /// Whether any of the transaction's key images is referenced by a
    /// pool entry other than `exclude`.
    fn spends_pool_output(&self, tx: &Transaction, exclude: Option<&Hash>) -> bool {
        tx.key_images().any(|image| {
            self.spent_key_images
                .get(image)
                .is_some_and(|owner| Some(owner) != exclude)
        })
    }

    //------------------------------------------------ Admission

    /// Admit a transaction.
    ///
    /// `kept_by_block` marks transactions re-added by a reorg: they
    /// bypass the fee floor, the pool double-spend screen, and failed
    /// chain validation (admitted with verification marked
    /// impossible).
    pub fn add_transaction<V: TransactionValidator>(
        &mut self,
        cached: CachedTransaction,
        kept_by_block: bool,
        validator: &V,
        now: u64,
    ) -> Result<AddedToPool, PoolAddError> {
        let hash = *cached.hash();
        if self.transactions.contains_key(&hash) {
            return Err(PoolAddError::Duplicate);
        }

        let tx = cached.transaction();
        check_transaction_statics(tx, cached.blob_size())?;

        let fee = tx.fee().ok_or(TransactionError::OutputsTooHigh)?;
        if !kept_by_block && fee < self.currency.minimum_fee() {
            tracing::debug!(%hash, fee, "transaction fee is not enough");
            return Err(PoolAddError::FeeTooLow);
        }

        if !kept_by_block && self.spends_pool_output(tx, None) {
            tracing::debug!(%hash, "transaction uses inputs already spent in the pool");
            return Err(PoolAddError::DoubleSpend);
        }

        let max_used_block = validator.check_transaction_inputs(tx);
        let verification_impossible = max_used_block.is_none();
        if verification_impossible && !kept_by_block {
            tracing::debug!(%hash, "transaction used wrong inputs, rejected");
            return Err(PoolAddError::InvalidInputs);
        }

        let entry = PoolTransaction {
            cached,
            fee,
            kept_by_block,
            receive_time: now,
            max_used_block,
            last_failed_block: None,
        };

        for image in entry.transaction().key_images() {
            self.spent_key_images.insert(*image, hash);
        }
        self.priority.insert(entry.priority_key());
        self.transactions.insert(hash, entry);

        Ok(AddedToPool {
            should_be_relayed: !verification_impossible && fee > 0,
            verification_impossible,
        })
    }

    //------------------------------------------------ Removal

    /// Put back a transaction previously taken, e.g. when the block
    /// that claimed it failed validation. Nothing is re-validated.
    pub fn restore_transaction(&mut self, entry: PoolTransaction) {
        let hash = *entry.hash();
        for image in entry.transaction().key_images() {
            self.spent_key_images.insert(*image, hash);
        }
        self.priority.insert(entry.priority_key());
        self.transactions.insert(hash, entry);
    }

    /// Remove and return a transaction, e.g. when a block confirms it.
    pub fn take_transaction(&mut self, hash: &Hash) -> Option<PoolTransaction> {
        let entry = self.transactions.shift_remove(hash)?;
        self.priority.remove(&entry.priority_key());
        for image in entry.transaction().key_images() {
            if self.spent_key_images.get(image) == Some(hash) {
                self.spent_key_images.remove(image);
            }
        }
        Some(entry)
    }

    /// Drop every pool transaction that references one of the given
    /// key images, returning their hashes. Called when a new block
    /// confirms those spends.
    pub fn remove_spending(&mut self, key_images: &[KeyImage]) -> Vec<Hash> {
        let mut owners: Vec<Hash> = key_images
            .iter()
            .filter_map(|image| self.spent_key_images.get(image).copied())
            .collect();
        owners.sort_unstable();
        owners.dedup();

        for hash in &owners {
            tracing::debug!(%hash, "dropping pool transaction spent by a new block");
            self.take_transaction(hash);
        }
        owners
    }

    /// Drop transactions older than their livetime, returning their
    /// hashes.
    pub fn remove_expired(&mut self, now: u64) -> Vec<Hash> {
        let normal_livetime = self.currency.mempool_tx_livetime();
        let kept_livetime = self.currency.mempool_tx_from_alt_block_livetime();

        let expired: Vec<Hash> = self
            .transactions
            .values()
            .filter(|entry| {
                let livetime = if entry.kept_by_block {
                    kept_livetime
                } else {
                    normal_livetime
                };
                now.saturating_sub(entry.receive_time) > livetime
            })
            .map(|entry| *entry.hash())
            .collect();

        for hash in &expired {
            tracing::debug!(%hash, "dropping expired pool transaction");
            self.take_transaction(hash);
        }
        expired
    }

    //------------------------------------------------ Template fill

    /// Whether the transaction would be valid in the next block.
    fn is_ready<V: TransactionValidator>(&self, entry: &PoolTransaction, validator: &V) -> bool {
        validator.check_transaction_inputs(entry.transaction()).is_some()
            && !validator.have_spent_key_images(entry.transaction())
    }

    /// Pick transactions for a block template in fee-density order.
    ///
    /// Returns the chosen hashes plus their total size and fee. The
    /// result is deterministic given the pool contents and chain tip.
    pub fn fill_block_template<V: TransactionValidator>(
        &mut self,
        validator: &V,
        median_size: usize,
        max_cumulative_size: usize,
    ) -> (Vec<Hash>, usize, u64) {
        let mut total_size = 0;
        let mut total_fee = 0;

        let max_total_size = (125 * median_size / 100)
            .saturating_sub(self.currency.coinbase_blob_reserved_size())
            .min(max_cumulative_size);

        let mut template = BlockTemplate::new();
        let keys: Vec<PriorityKey> = self.priority.iter().copied().collect();

        for key in keys {
            let entry = &self.transactions[&key.hash];
            if total_size + entry.blob_size() > max_total_size {
                continue;
            }

            let ready_result = validator.check_transaction_inputs(entry.transaction());
            let ready = ready_result.is_some()
                && !validator.have_spent_key_images(entry.transaction());

            // Remember what the re-check learned either way.
            {
                let entry = &mut self.transactions[&key.hash];
                match ready_result {
                    Some(max_used) => entry.max_used_block = Some(max_used),
                    None => entry.last_failed_block = entry.max_used_block.take(),
                }
            }

            let entry = &self.transactions[&key.hash];
            if ready && template.add_transaction(entry.hash(), entry.transaction()) {
                total_size += entry.blob_size();
                total_fee += entry.fee();
            }
        }

        (template.into_transactions(), total_size, total_fee)
    }

    //------------------------------------------------ Pool delta

    /// Split the pool view for a peer that knows `known`: which ready
    /// transactions it is missing, and which of its known hashes are
    /// gone from the pool.
    pub fn difference<V: TransactionValidator>(
        &self,
        known: &[Hash],
        validator: &V,
    ) -> (Vec<Hash>, Vec<Hash>) {
        let ready: HashSet<Hash> = self
            .transactions
            .values()
            .filter(|entry| self.is_ready(entry, validator))
            .map(|entry| *entry.hash())
            .collect();

        let known_set: HashSet<Hash> = known.iter().copied().collect();

        let new_hashes: Vec<Hash> = self
            .transactions
            .values()
            .map(|entry| *entry.hash())
            .filter(|hash| ready.contains(hash) && !known_set.contains(hash))
            .collect();
        let mut removed: Vec<Hash> = known_set
            .iter()
            .filter(|hash| !self.transactions.contains_key(*hash))
            .copied()
            .collect();

        // Arrival order for the new ones is already deterministic;
        // sort the removals for a stable answer.
        removed.sort_unstable();
        (new_hashes, removed)
    }

    /// The priority order recomputed from scratch; the live secondary
    /// index must always agree with it.
    #[cfg(test)]
    fn recomputed_priority(&self) -> Vec<PriorityKey> {
        let mut keys: Vec<PriorityKey> = self
            .transactions
            .values()
            .map(PoolTransaction::priority_key)
            .collect();
        keys.sort_unstable();
        keys
    }
}
