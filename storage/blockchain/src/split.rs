//! The split primitive: atomically snap the chain back to a given
//! height, returning the removed suffix for potential reapply.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::BTreeMap;

use azurite_database::Database;
use azurite_helper::time::{round_to_midnight, ONE_DAY_SECONDS};
use azurite_types::{Amount, BlockIndex, CachedBlock, CachedTransaction, GlobalOutputIndex, Hash};

use crate::{
    cache::{BlockchainCache, PendingCounts},
    error::CacheError,
    read_batch::BlockchainReadBatch,
    types::{ExtendedTransactionInfo, PushedBlockInfo, SplitSegment, ValidatorState},
    write_batch::BlockchainWriteBatch,
};

impl<D: Database> BlockchainCache<D> {
    /// Remove every record introduced at heights `>= split_index`
    /// across all indexes, in one atomic batch, returning the removed
    /// blocks ready for reapply.
    ///
    /// The genesis block cannot be split away.
    pub fn split(&mut self, split_index: BlockIndex) -> Result<SplitSegment, CacheError> {
        let top = self.top_block_index()?;
        if split_index == 0 || split_index > top {
            return Err(CacheError::InvariantViolation(
                "split index must be within (0, top]",
            ));
        }
        tracing::debug!(split_index, top, "split started");

        let mut batch = BlockchainWriteBatch::new();
        let mut pending = PendingCounts::default();

        // Gather the suffix before deleting anything.
        let mut segment = SplitSegment {
            start_index: split_index,
            blocks: Vec::with_capacity((top - split_index + 1) as usize),
        };
        for block_index in split_index..=top {
            segment.blocks.push(self.pushed_block_info(block_index)?);
        }

        // Per-block records, top first so the last written top-block
        // scalar is `split_index - 1`. Timestamp buckets are collected
        // and rewritten once each, so blocks sharing a second don't
        // clobber one another's removal.
        let mut removed_by_timestamp: BTreeMap<u64, Vec<Hash>> = BTreeMap::new();
        for (offset, pushed) in segment.blocks.iter().enumerate().rev() {
            let block_index = split_index + offset as u32;
            let block = CachedBlock::from_blob(pushed.raw_block.block.clone())?;

            batch.remove_cached_block(block.hash(), block_index)?;
            batch.remove_raw_block(block_index);
            batch.remove_spent_key_images(
                block_index,
                &pushed.validator_state.spent_key_images,
            );
            removed_by_timestamp
                .entry(pushed.timestamp)
                .or_default()
                .push(*block.hash());
        }
        self.remove_timestamp_entries(&mut batch, &removed_by_timestamp)?;

        // Transaction records.
        let deleted_tx_hashes = self.transaction_hashes_from(split_index, top)?;
        let deleted_infos = self.extended_transaction_infos(&deleted_tx_hashes)?;

        let mut txs_count = self.transactions_count()?;
        for hash in &deleted_tx_hashes {
            if txs_count == 0 {
                return Err(CacheError::InvariantViolation(
                    "transaction count underflow during split",
                ));
            }
            txs_count -= 1;
            batch.remove_cached_transaction(hash, txs_count)?;
        }
        pending.transactions_count = Some(txs_count);

        self.remove_payment_ids(&mut batch, &deleted_infos)?;

        // Key output suffixes per amount: everything from the lowest
        // global index any removed transaction introduced.
        let boundaries = key_index_split_boundaries(&deleted_infos);
        self.remove_key_outputs(&mut batch, &mut pending, &boundaries)?;

        self.delete_closest_timestamp_record(&mut batch, split_index)?;

        tracing::debug!(operations = batch.len(), "performing delete operations");
        self.db.write(batch)?;

        // Commit succeeded; caches may now move.
        self.apply_pending(pending);
        self.top_block_index.set(Some(split_index - 1));
        self.top_block_hash.set(None);
        {
            let mut window = self.window.borrow_mut();
            let keep = window
                .len()
                .saturating_sub((top - split_index + 1) as usize);
            window.truncate(keep);
        }
        if self.window.borrow().is_empty() {
            self.fill_window()?;
        }

        tracing::debug!(split_index, "split completed");
        Ok(segment)
    }

    /// Reapply a block previously removed by [`Self::split`], without
    /// revalidation.
    pub fn push_stored_block(&mut self, pushed: PushedBlockInfo) -> Result<(), CacheError> {
        let block = CachedBlock::from_blob(pushed.raw_block.block.clone())?;
        let transactions = pushed
            .raw_block
            .transactions
            .iter()
            .map(|blob| CachedTransaction::from_blob(blob.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        self.push_block(
            &block,
            &transactions,
            pushed.validator_state,
            pushed.block_size,
            pushed.generated_coins,
            pushed.block_difficulty,
            pushed.raw_block,
        )
    }

    /// Everything needed to reapply the block at `block_index`.
    pub fn pushed_block_info(&self, block_index: BlockIndex) -> Result<PushedBlockInfo, CacheError> {
        let result = self.read(
            BlockchainReadBatch::new()
                .request_raw_block(block_index)
                .request_cached_block(block_index)
                .request_spent_key_images_by_block(block_index),
        )?;

        let info = result
            .cached_blocks()
            .get(&block_index)
            .ok_or(CacheError::NotFound)?;
        let raw_block = result
            .raw_blocks()
            .get(&block_index)
            .cloned()
            .ok_or(CacheError::NotFound)?;
        let spent_key_images = result
            .spent_key_images_by_block()
            .get(&block_index)
            .cloned()
            .unwrap_or_default();

        let (block_difficulty, generated_coins) = if block_index == 0 {
            (info.cumulative_difficulty, info.already_generated_coins)
        } else {
            let parent = self.block_info(block_index - 1)?;
            (
                info.cumulative_difficulty - parent.cumulative_difficulty,
                info.already_generated_coins - parent.already_generated_coins,
            )
        };

        Ok(PushedBlockInfo {
            raw_block,
            validator_state: ValidatorState {
                spent_key_images: spent_key_images.into_iter().collect(),
            },
            block_size: u64::from(info.block_size),
            generated_coins,
            block_difficulty,
            timestamp: info.timestamp,
        })
    }

    //------------------------------------------------ Helpers

    fn transaction_hashes_from(
        &self,
        split_index: BlockIndex,
        top: BlockIndex,
    ) -> Result<Vec<Hash>, CacheError> {
        let mut batch = BlockchainReadBatch::new();
        for block_index in split_index..=top {
            batch = batch.request_transaction_hashes_by_block(block_index);
        }
        let result = self.read(batch)?;

        let mut hashes = Vec::new();
        for block_index in split_index..=top {
            let block_hashes = result
                .transaction_hashes_by_block()
                .get(&block_index)
                .ok_or(CacheError::InvariantViolation(
                    "main chain block has no transaction hash list",
                ))?;
            hashes.extend_from_slice(block_hashes);
        }
        Ok(hashes)
    }

    fn extended_transaction_infos(
        &self,
        hashes: &[Hash],
    ) -> Result<Vec<ExtendedTransactionInfo>, CacheError> {
        let mut batch = BlockchainReadBatch::new();
        for hash in hashes {
            batch = batch.request_cached_transaction(hash);
        }
        let result = self.read(batch)?;

        hashes
            .iter()
            .map(|hash| {
                result
                    .cached_transactions()
                    .get(hash)
                    .cloned()
                    .ok_or(CacheError::InvariantViolation(
                        "indexed transaction has no extended info record",
                    ))
            })
            .collect()
    }

    fn remove_payment_ids(
        &self,
        batch: &mut BlockchainWriteBatch,
        deleted: &[ExtendedTransactionInfo],
    ) -> Result<(), CacheError> {
        let mut to_delete: BTreeMap<azurite_types::PaymentId, u32> = BTreeMap::new();
        for info in deleted {
            if let Some(payment_id) =
                azurite_types::payment_id_from_extra(&info.transaction.extra)
            {
                *to_delete.entry(payment_id).or_default() += 1;
            }
        }

        for (payment_id, records_to_remove) in to_delete {
            let count = self.transactions_count_by_payment_id(&payment_id)?;
            if count < records_to_remove {
                return Err(CacheError::InvariantViolation(
                    "payment id count is smaller than the records being removed",
                ));
            }
            tracing::debug!(
                %payment_id,
                records_to_remove,
                "deleting trailing payment id records"
            );
            batch.remove_payment_id(&payment_id, records_to_remove, count - records_to_remove)?;
        }
        Ok(())
    }

    fn remove_key_outputs(
        &self,
        batch: &mut BlockchainWriteBatch,
        pending: &mut PendingCounts,
        boundaries: &BTreeMap<Amount, GlobalOutputIndex>,
    ) -> Result<(), CacheError> {
        if boundaries.is_empty() {
            return Ok(());
        }

        let mut amounts_dropped = 0_u32;
        let mut new_amounts = Vec::new();
        for (&amount, &boundary) in boundaries {
            let count = self.key_outputs_count_for_amount(amount)?;
            if boundary >= count {
                return Err(CacheError::InvariantViolation(
                    "key output split boundary is past the stored count",
                ));
            }

            batch.remove_key_output_global_indexes(amount, count - boundary, boundary)?;
            for index in boundary..count {
                batch.remove_key_output_info(amount, index);
            }

            // The in-memory count drops to the boundary; the delta is
            // negative by construction.
            self.update_key_output_count(
                pending,
                amount,
                i64::from(boundary) - i64::from(count),
                &mut new_amounts,
            )?;

            if boundary == 0 {
                amounts_dropped += 1;
            }
        }
        debug_assert!(new_amounts.is_empty());

        if amounts_dropped > 0 {
            // Amounts emptied by the split were the newest ones, so
            // they occupy the enumeration's tail.
            let amounts_count = self.key_output_amounts_count()?;
            if amounts_count < amounts_dropped {
                return Err(CacheError::InvariantViolation(
                    "amount enumeration count is smaller than the amounts being dropped",
                ));
            }
            let new_total = amounts_count - amounts_dropped;
            batch.remove_key_output_amounts(amounts_dropped, new_total)?;
            pending.amounts_count = Some(new_total);
        }

        Ok(())
    }

    /// Remove the given hashes from their timestamp buckets, removing
    /// a bucket outright when it empties. One write per bucket.
    fn remove_timestamp_entries(
        &self,
        batch: &mut BlockchainWriteBatch,
        removed_by_timestamp: &BTreeMap<u64, Vec<Hash>>,
    ) -> Result<(), CacheError> {
        let mut read = BlockchainReadBatch::new();
        for &timestamp in removed_by_timestamp.keys() {
            read = read.request_block_hashes_by_timestamp(timestamp);
        }
        let result = self.read(read)?;

        for (&timestamp, removed) in removed_by_timestamp {
            let Some(hashes) = result.block_hashes_by_timestamp().get(&timestamp) else {
                continue;
            };

            let remaining: Vec<Hash> = hashes
                .iter()
                .filter(|hash| !removed.contains(hash))
                .copied()
                .collect();

            if remaining.is_empty() {
                tracing::debug!(timestamp, "deleting empty timestamp bucket");
                batch.remove_timestamp(timestamp);
            } else {
                batch.insert_timestamp(timestamp, &remaining)?;
            }
        }
        Ok(())
    }

    /// Walk the per-day closest-timestamp index forward from the split
    /// point's day, deleting records that now point above the new top.
    fn delete_closest_timestamp_record(
        &self,
        batch: &mut BlockchainWriteBatch,
        split_index: BlockIndex,
    ) -> Result<(), CacheError> {
        let split_timestamp = self.block_info(split_index)?.timestamp;
        let mut midnight = round_to_midnight(split_timestamp);

        let result = self
            .read(BlockchainReadBatch::new().request_closest_timestamp_block_index(midnight))?;
        let &first_index = result
            .closest_timestamp_block_index()
            .get(&midnight)
            .ok_or(CacheError::InvariantViolation(
                "split day has no closest-timestamp record",
            ))?;
        debug_assert!(first_index <= split_index);

        // The split day keeps its record if an earlier surviving block
        // anchors it.
        if first_index != split_index {
            midnight += ONE_DAY_SECONDS;
        }

        loop {
            let result = self
                .read(BlockchainReadBatch::new().request_closest_timestamp_block_index(midnight))?;
            if !result.closest_timestamp_block_index().contains_key(&midnight) {
                break;
            }
            batch.remove_closest_timestamp_block_index(midnight);
            midnight += ONE_DAY_SECONDS;
        }
        Ok(())
    }
}

/// Lowest global index per amount introduced by the removed
/// transactions.
fn key_index_split_boundaries(
    deleted: &[ExtendedTransactionInfo],
) -> BTreeMap<Amount, GlobalOutputIndex> {
    let mut boundaries = BTreeMap::new();
    for info in deleted {
        for (&amount, indexes) in &info.amount_to_key_indexes {
            let Some(&min_index) = indexes.iter().min() else {
                continue;
            };
            boundaries
                .entry(amount)
                .and_modify(|boundary: &mut GlobalOutputIndex| {
                    *boundary = (*boundary).min(min_index);
                })
                .or_insert(min_index);
        }
    }
    boundaries
}
