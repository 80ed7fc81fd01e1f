#![doc = include_str!("../README.md")]

mod checkpoints;
mod config;
mod error;
mod manager;
mod validator;

pub use checkpoints::Checkpoints;
pub use config::{CheckpointEntry, Config};
pub use error::CoreError;
pub use manager::{BlockAddResult, ChainManager};
pub use validator::ChainInputValidator;

//---------------------------------------------------------------------------------------------------- Import
use std::sync::Arc;

use azurite_blockchain::BlockchainCache;
use azurite_consensus_rules::{
    miner_tx::construct_coinbase_tx, Currency, PowHasher, RingSignatureVerifier,
};
use azurite_database::Database;
use azurite_helper::{num::median, time::current_unix_timestamp};
use azurite_txpool::TransactionPool;
use azurite_types::{
    Amount, Block, BlockHeader, BlockIndex, CachedBlock, CachedTransaction, Difficulty,
    GlobalOutputIndex, Hash, PublicKey, RawBlock,
};

//---------------------------------------------------------------------------------------------------- Constants
/// Blocks handed out per `query_blocks` response.
const BLOCKS_SYNCHRONIZING_COUNT: usize = 200;

/// Upper bound on coinbase outputs when building a template.
const TEMPLATE_MAX_COINBASE_OUTS: usize = 20;

/// Template construction re-measures the coinbase until its size
/// converges, at most this many times.
const TEMPLATE_SIZE_TRIES: usize = 10;

//---------------------------------------------------------------------------------------------------- Results
/// Outcome of `handle_incoming_tx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAddResult {
    /// Admitted; worth relaying when `true`.
    Added { should_be_relayed: bool },
    AlreadyExists,
}

/// One entry of a `query_blocks` answer.
#[derive(Debug, Clone)]
pub enum QueriedBlock {
    /// Before the full-blob offset only the hash travels.
    Id(Hash),
    /// At or after it, the full block with its transactions.
    Full { hash: Hash, raw: RawBlock },
}

/// The catch-up answer for a syncing peer.
#[derive(Debug, Clone)]
pub struct QueryBlocksResult {
    pub start_height: BlockIndex,
    pub current_height: BlockIndex,
    pub full_offset: BlockIndex,
    pub items: Vec<QueriedBlock>,
}

/// Random ring-member candidates for one amount.
#[derive(Debug, Clone)]
pub struct RandomOuts {
    pub amount: Amount,
    pub outs: Vec<(GlobalOutputIndex, PublicKey)>,
}

/// Events pushed to registered observers.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// The main chain advanced (append or reorg).
    BlockAdded { index: BlockIndex, hash: Hash },
    /// The main chain switched to another branch.
    ChainSwitched { new_top_index: BlockIndex },
    /// A relayable transaction entered the pool.
    TransactionAdded { hash: Hash },
}

//---------------------------------------------------------------------------------------------------- Core
/// The single entry point for the outside world: composes the chain
/// manager, the pool and the notification fan-out.
pub struct Core<D, P, R> {
    manager: ChainManager<D, P, R>,
    pool: TransactionPool,
    observers: Vec<Box<dyn FnMut(&CoreEvent) + Send>>,
}

impl<D: Database, P: PowHasher, R: RingSignatureVerifier> Core<D, P, R> {
    pub fn new(
        currency: Arc<Currency>,
        db: D,
        pow: P,
        ring_verifier: R,
        checkpoints: Checkpoints,
    ) -> Result<Self, CoreError> {
        let manager = ChainManager::new(Arc::clone(&currency), db, pow, ring_verifier, checkpoints)?;
        let pool = TransactionPool::new(currency);
        Ok(Self {
            manager,
            pool,
            observers: Vec::new(),
        })
    }

    pub fn cache(&self) -> &BlockchainCache<D> {
        self.manager.cache()
    }

    pub fn currency(&self) -> &Currency {
        self.manager.currency()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Register an observer; every core event is pushed to each one.
    pub fn subscribe(&mut self, observer: Box<dyn FnMut(&CoreEvent) + Send>) {
        self.observers.push(observer);
    }

    fn notify(&mut self, event: &CoreEvent) {
        for observer in &mut self.observers {
            observer(event);
        }
    }

    //------------------------------------------------ Blocks

    /// Ingest a raw block blob from a peer or miner.
    pub fn handle_incoming_block(&mut self, blob: &[u8]) -> Result<BlockAddResult, CoreError> {
        let cached_block = CachedBlock::from_blob(blob.to_vec())?;
        let now = current_unix_timestamp();

        let result = self
            .manager
            .handle_block(cached_block, &mut self.pool, now)?;

        match result {
            BlockAddResult::AddedToMainChain => {
                let index = self.cache().top_block_index()?;
                let hash = self.cache().top_block_hash()?;
                self.notify(&CoreEvent::BlockAdded { index, hash });
            }
            BlockAddResult::Reorganized => {
                let new_top_index = self.cache().top_block_index()?;
                self.notify(&CoreEvent::ChainSwitched { new_top_index });
            }
            BlockAddResult::AddedToAltChain | BlockAddResult::AlreadyExists => {}
        }
        Ok(result)
    }

    //------------------------------------------------ Transactions

    /// Ingest a raw transaction blob. `kept_by_block` marks
    /// transactions resurrected by a reorg.
    pub fn handle_incoming_tx(
        &mut self,
        blob: &[u8],
        kept_by_block: bool,
    ) -> Result<TxAddResult, CoreError> {
        let cached = CachedTransaction::from_blob(blob.to_vec())?;
        let hash = *cached.hash();

        if self.pool.contains(&hash) || self.cache().has_transaction(&hash)? {
            return Ok(TxAddResult::AlreadyExists);
        }

        // A key image already on the main chain is a double-spend, not
        // merely an input-check failure.
        for image in cached.transaction().key_images() {
            if self.cache().is_spent_at_top(image)? {
                return Err(CoreError::DoubleSpend(*image));
            }
        }

        let added = self.pool.add_transaction(
            cached,
            kept_by_block,
            &self.manager.input_validator(),
            current_unix_timestamp(),
        )?;

        if added.should_be_relayed {
            self.notify(&CoreEvent::TransactionAdded { hash });
        }
        Ok(TxAddResult::Added {
            should_be_relayed: added.should_be_relayed,
        })
    }

    //------------------------------------------------ Mining

    /// Assemble a block template paying `miner_key`.
    pub fn get_block_template(
        &mut self,
        miner_key: &PublicKey,
        extra_nonce: &[u8],
    ) -> Result<(Block, Difficulty, BlockIndex), CoreError> {
        let currency = self.manager.currency();
        let cache = self.manager.cache();
        let top = cache.top_block_index()?;
        let height = top + 1;

        let mut sizes = cache.last_block_sizes(currency.reward_blocks_window(), top, true)?;
        sizes.sort_unstable();
        let median_size = median(&sizes) as usize;

        let already_generated = cache.block_info(top)?.already_generated_coins;
        let penalize_fee = self.manager.expected_major_version(height) >= 2;
        let max_cumulative = currency.max_block_cumulative_size(u64::from(height));

        let validator = self.manager.input_validator();
        let (tx_hashes, txs_size, fee) =
            self.pool
                .fill_block_template(&validator, median_size, max_cumulative);

        // The coinbase size feeds the reward penalty, and the reward
        // decides the coinbase's output count; iterate to a fixed
        // point.
        let construct = |current_block_size: usize| {
            construct_coinbase_tx(
                currency,
                height,
                median_size,
                already_generated,
                current_block_size,
                fee,
                miner_key,
                extra_nonce,
                TEMPLATE_MAX_COINBASE_OUTS,
                penalize_fee,
            )
        };

        let mut cumulative_size = txs_size + currency.coinbase_blob_reserved_size();
        let mut coinbase = construct(cumulative_size)?;
        for _ in 0..TEMPLATE_SIZE_TRIES {
            let measured = txs_size + azurite_types::to_blob(&coinbase)?.len();
            if measured == cumulative_size {
                break;
            }
            cumulative_size = measured;
            coinbase = construct(cumulative_size)?;
        }

        let block = Block {
            header: BlockHeader {
                major_version: self.manager.expected_major_version(height),
                minor_version: 0,
                timestamp: current_unix_timestamp(),
                previous: cache.top_block_hash()?,
                nonce: 0,
            },
            coinbase,
            transaction_hashes: tx_hashes,
        };

        let difficulty = self.manager.next_block_difficulty()?;
        Ok((block, difficulty, height))
    }

    //------------------------------------------------ Sync queries

    /// Answer a catch-up request: locate the last known hash, then
    /// stream hashes up to the timestamp cutoff and full blocks after
    /// it.
    pub fn query_blocks(
        &self,
        known_hashes: &[Hash],
        since_timestamp: u64,
    ) -> Result<QueryBlocksResult, CoreError> {
        let cache = self.cache();
        let top = cache.top_block_index()?;

        // Peers order their hashes newest first and always include the
        // genesis, so the first match is the freshest common block.
        let mut start_height = None;
        for hash in known_hashes {
            match cache.block_index(hash) {
                Ok(index) => {
                    start_height = Some(index);
                    break;
                }
                Err(azurite_blockchain::CacheError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let start_height = start_height.ok_or(CoreError::Orphan(
            known_hashes.last().copied().unwrap_or(Hash::ZERO),
        ))?;

        let full_offset = cache
            .timestamp_lower_bound_block_index(since_timestamp)?
            .max(start_height + 1);

        let mut items = Vec::new();
        let mut index = start_height + 1;
        while index <= top && items.len() < BLOCKS_SYNCHRONIZING_COUNT {
            if index < full_offset {
                items.push(QueriedBlock::Id(cache.block_hash(index)?));
            } else {
                items.push(QueriedBlock::Full {
                    hash: cache.block_hash(index)?,
                    raw: cache.raw_block(index)?,
                });
            }
            index += 1;
        }

        Ok(QueryBlocksResult {
            start_height,
            current_height: top + 1,
            full_offset,
            items,
        })
    }

    /// Random unlocked ring members for each requested amount.
    pub fn get_random_outs_for_amounts(
        &self,
        amounts: &[Amount],
        count: usize,
    ) -> Result<Vec<RandomOuts>, CoreError> {
        let cache = self.cache();
        let top = cache.top_block_index()?;

        let mut result = Vec::with_capacity(amounts.len());
        for &amount in amounts {
            let indexes = cache.random_unlocked_outputs(amount, count, top)?;
            let keys = cache.extract_key_output_keys(amount, &indexes, top)?;
            result.push(RandomOuts {
                amount,
                outs: indexes.into_iter().zip(keys).collect(),
            });
        }
        Ok(result)
    }

    /// The global output indexes assigned to a transaction at append
    /// time.
    pub fn get_transaction_global_indexes(
        &self,
        tx_hash: &Hash,
    ) -> Result<Vec<GlobalOutputIndex>, CoreError> {
        Ok(self.cache().transaction_global_indexes(tx_hash)?)
    }

    /// The pool view for a peer: whether its tip is current, the
    /// relayable transactions it misses (as blobs), and the hashes it
    /// knows that are gone.
    pub fn get_pool_delta(
        &self,
        known_pool_hashes: &[Hash],
        known_tip: &Hash,
    ) -> Result<(bool, Vec<Vec<u8>>, Vec<Hash>), CoreError> {
        let is_tip_current = *known_tip == self.cache().top_block_hash()?;

        let validator = self.manager.input_validator();
        let (new_hashes, removed) = self.pool.difference(known_pool_hashes, &validator);

        let mut new_blobs = Vec::with_capacity(new_hashes.len());
        for hash in &new_hashes {
            if let Some(entry) = self.pool.get(hash) {
                new_blobs.push(entry.cached().blob().to_vec());
            }
        }
        Ok((is_tip_current, new_blobs, removed))
    }

    /// Pop blocks off the main chain top; their transactions return
    /// to the pool where still valid. Returns the new top index.
    pub fn pop_blocks(&mut self, count: u32) -> Result<BlockIndex, CoreError> {
        let new_top =
            self.manager
                .pop_blocks(count, &mut self.pool, current_unix_timestamp())?;
        self.notify(&CoreEvent::ChainSwitched {
            new_top_index: new_top,
        });
        Ok(new_top)
    }

    //------------------------------------------------ Housekeeping

    /// Periodic maintenance: expire pool transactions, prune stale
    /// alternative blocks.
    pub fn on_idle(&mut self) -> Result<(), CoreError> {
        let now = current_unix_timestamp();
        let expired = self.pool.remove_expired(now);
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired pool transactions dropped");
        }
        let pruned = self.manager.prune_alt_blocks()?;
        if pruned > 0 {
            tracing::debug!(count = pruned, "stale alternative blocks pruned");
        }
        Ok(())
    }
}
