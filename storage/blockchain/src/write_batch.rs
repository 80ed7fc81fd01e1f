//! The typed write-batch builder.
//!
//! Each `insert_*`/`remove_*` call appends raw KV operations; nothing
//! touches the store until the whole batch is handed to
//! [`Database::write`](azurite_database::Database::write), which
//! applies it atomically. No deduplication happens here, so a caller
//! must never insert and remove the same key within one batch.

//---------------------------------------------------------------------------------------------------- Import
use azurite_database::{RawWriteBatch, WriteBatch};
use azurite_types::{
    to_blob, Amount, BlockIndex, GlobalOutputIndex, Hash, KeyImage, PaymentId, RawBlock,
};

use crate::{
    error::CacheError,
    schema,
    types::{CachedBlockInfo, ExtendedTransactionInfo, KeyOutputInfo, PackedOutputReference},
    DB_SCHEME_VERSION,
};

//---------------------------------------------------------------------------------------------------- BlockchainWriteBatch
/// Assembles one atomic mutation of the cache.
#[derive(Debug, Default)]
pub struct BlockchainWriteBatch {
    raw: RawWriteBatch,
}

impl BlockchainWriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    fn insert<T: bincode::Encode>(&mut self, key: Vec<u8>, value: &T) -> Result<(), CacheError> {
        let value = to_blob(value)?;
        self.raw.to_insert.push((key, value));
        Ok(())
    }

    fn remove(&mut self, key: Vec<u8>) {
        self.raw.to_remove.push(key);
    }

    //------------------------------------------------ Inserts

    /// Key images spent by the block at `block_index`, both as the
    /// per-block set and as individual image → block entries.
    pub fn insert_spent_key_images<'a, I>(
        &mut self,
        block_index: BlockIndex,
        spent_key_images: I,
    ) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = &'a KeyImage> + Clone,
    {
        let images: Vec<KeyImage> = spent_key_images.clone().into_iter().copied().collect();
        self.insert(
            schema::block_index_key(schema::SPENT_KEY_IMAGES_BY_BLOCK, block_index),
            &images,
        )?;
        for key_image in spent_key_images {
            self.insert(schema::spent_key_image_key(key_image), &block_index)?;
        }
        Ok(())
    }

    pub fn insert_cached_transaction(
        &mut self,
        transaction: &ExtendedTransactionInfo,
        total_txs_count: u64,
    ) -> Result<(), CacheError> {
        self.insert(schema::tx_info_key(&transaction.transaction_hash), transaction)?;
        self.insert(
            schema::sub_key(schema::TX_INFO_BY_HASH, schema::TXS_COUNT_KEY),
            &total_txs_count,
        )
    }

    pub fn insert_payment_id(
        &mut self,
        transaction_hash: &Hash,
        payment_id: &PaymentId,
        total_count_for_payment_id: u32,
    ) -> Result<(), CacheError> {
        if total_count_for_payment_id == 0 {
            return Err(CacheError::InvariantViolation(
                "payment id count must be positive after an insert",
            ));
        }
        self.insert(
            schema::payment_id_count_key(payment_id),
            &total_count_for_payment_id,
        )?;
        self.insert(
            schema::payment_id_index_key(payment_id, total_count_for_payment_id - 1),
            transaction_hash,
        )
    }

    /// Block info plus the hash → index mapping, the per-block tx-hash
    /// list and the top-block scalar.
    pub fn insert_cached_block(
        &mut self,
        block: &CachedBlockInfo,
        block_index: BlockIndex,
        block_tx_hashes: &[Hash],
    ) -> Result<(), CacheError> {
        self.insert(
            schema::block_index_key(schema::BLOCK_INFO_BY_INDEX, block_index),
            block,
        )?;
        self.insert(
            schema::block_index_key(schema::TX_HASHES_BY_BLOCK, block_index),
            &block_tx_hashes.to_vec(),
        )?;
        self.insert(
            schema::hash_key(schema::BLOCK_INDEX_BY_HASH, &block.block_hash.0),
            &block_index,
        )?;
        self.insert(
            schema::sub_key(schema::SCALARS, schema::LAST_BLOCK_INDEX_KEY),
            &block_index,
        )
    }

    /// New per-index records for an amount, ending at
    /// `total_count_for_amount − 1`, plus the updated count scalar.
    pub fn insert_key_output_global_indexes(
        &mut self,
        amount: Amount,
        outputs: &[PackedOutputReference],
        total_count_for_amount: u32,
    ) -> Result<(), CacheError> {
        if (total_count_for_amount as usize) < outputs.len() {
            return Err(CacheError::InvariantViolation(
                "key output total is smaller than the outputs being inserted",
            ));
        }
        self.insert(
            schema::amount_key(schema::KEY_OUTPUT_AMOUNT, amount),
            &total_count_for_amount,
        )?;
        let mut global_index = total_count_for_amount - outputs.len() as u32;
        for output in outputs {
            self.insert(
                schema::amount_index_key(schema::KEY_OUTPUT_AMOUNT, amount, global_index),
                output,
            )?;
            global_index += 1;
        }
        Ok(())
    }

    pub fn insert_raw_block(
        &mut self,
        block_index: BlockIndex,
        block: &RawBlock,
    ) -> Result<(), CacheError> {
        self.insert(
            schema::block_index_key(schema::RAW_BLOCK_BY_INDEX, block_index),
            block,
        )
    }

    pub fn insert_closest_timestamp_block_index(
        &mut self,
        timestamp: u64,
        block_index: BlockIndex,
    ) -> Result<(), CacheError> {
        self.insert(
            schema::timestamp_key(schema::CLOSEST_TIMESTAMP, timestamp),
            &block_index,
        )
    }

    /// Append newly-seen amounts to the amount enumeration, ending at
    /// `total_amounts_count − 1`, plus the updated count scalar.
    pub fn insert_key_output_amounts(
        &mut self,
        amounts: &[Amount],
        total_amounts_count: u32,
    ) -> Result<(), CacheError> {
        if (total_amounts_count as usize) < amounts.len() {
            return Err(CacheError::InvariantViolation(
                "amount enumeration total is smaller than the amounts being inserted",
            ));
        }
        self.insert(
            schema::sub_key(schema::KEY_OUTPUT_AMOUNTS, schema::KEY_AMOUNTS_COUNT_KEY),
            &total_amounts_count,
        )?;
        let mut index = total_amounts_count - amounts.len() as u32;
        for amount in amounts {
            self.insert(schema::key_output_amount_enum_key(index), amount)?;
            index += 1;
        }
        Ok(())
    }

    pub fn insert_timestamp(
        &mut self,
        timestamp: u64,
        block_hashes: &[Hash],
    ) -> Result<(), CacheError> {
        self.insert(
            schema::timestamp_key(schema::TIMESTAMP_TO_HASHES, timestamp),
            &block_hashes.to_vec(),
        )
    }

    pub fn insert_key_output_info(
        &mut self,
        amount: Amount,
        global_index: GlobalOutputIndex,
        info: &KeyOutputInfo,
    ) -> Result<(), CacheError> {
        self.insert(
            schema::amount_index_key(schema::KEY_OUTPUT_INFO, amount, global_index),
            info,
        )
    }

    pub fn insert_db_scheme_version(&mut self, version: u32) -> Result<(), CacheError> {
        self.insert(
            schema::sub_key(schema::DB_VERSION, schema::DB_SCHEME_VERSION_KEY),
            &version,
        )
    }

    //------------------------------------------------ Removes

    pub fn remove_spent_key_images<'a, I>(&mut self, block_index: BlockIndex, spent_key_images: I)
    where
        I: IntoIterator<Item = &'a KeyImage>,
    {
        self.remove(schema::block_index_key(
            schema::SPENT_KEY_IMAGES_BY_BLOCK,
            block_index,
        ));
        for key_image in spent_key_images {
            self.remove(schema::spent_key_image_key(key_image));
        }
    }

    pub fn remove_cached_transaction(
        &mut self,
        transaction_hash: &Hash,
        total_txs_count: u64,
    ) -> Result<(), CacheError> {
        self.remove(schema::tx_info_key(transaction_hash));
        self.insert(
            schema::sub_key(schema::TX_INFO_BY_HASH, schema::TXS_COUNT_KEY),
            &total_txs_count,
        )
    }

    /// Drop `records_to_remove` payment-id records from the tail,
    /// leaving `new_total` live ones.
    pub fn remove_payment_id(
        &mut self,
        payment_id: &PaymentId,
        records_to_remove: u32,
        new_total: u32,
    ) -> Result<(), CacheError> {
        if new_total == 0 {
            self.remove(schema::payment_id_count_key(payment_id));
        } else {
            self.insert(schema::payment_id_count_key(payment_id), &new_total)?;
        }
        for i in 0..records_to_remove {
            self.remove(schema::payment_id_index_key(payment_id, new_total + i));
        }
        Ok(())
    }

    pub fn remove_cached_block(
        &mut self,
        block_hash: &Hash,
        block_index: BlockIndex,
    ) -> Result<(), CacheError> {
        if block_index == 0 {
            return Err(CacheError::InvariantViolation(
                "the genesis block cannot be removed",
            ));
        }
        self.remove(schema::block_index_key(
            schema::BLOCK_INFO_BY_INDEX,
            block_index,
        ));
        self.remove(schema::block_index_key(
            schema::TX_HASHES_BY_BLOCK,
            block_index,
        ));
        self.remove(schema::hash_key(schema::BLOCK_INDEX_BY_HASH, &block_hash.0));
        self.insert(
            schema::sub_key(schema::SCALARS, schema::LAST_BLOCK_INDEX_KEY),
            &(block_index - 1),
        )
    }

    /// Drop `records_to_remove` per-index records from the tail of an
    /// amount, leaving `new_total` live ones.
    pub fn remove_key_output_global_indexes(
        &mut self,
        amount: Amount,
        records_to_remove: u32,
        new_total: u32,
    ) -> Result<(), CacheError> {
        if new_total == 0 {
            self.remove(schema::amount_key(schema::KEY_OUTPUT_AMOUNT, amount));
        } else {
            self.insert(
                schema::amount_key(schema::KEY_OUTPUT_AMOUNT, amount),
                &new_total,
            )?;
        }
        for i in 0..records_to_remove {
            self.remove(schema::amount_index_key(
                schema::KEY_OUTPUT_AMOUNT,
                amount,
                new_total + i,
            ));
        }
        Ok(())
    }

    pub fn remove_raw_block(&mut self, block_index: BlockIndex) {
        self.remove(schema::block_index_key(
            schema::RAW_BLOCK_BY_INDEX,
            block_index,
        ));
    }

    pub fn remove_closest_timestamp_block_index(&mut self, timestamp: u64) {
        self.remove(schema::timestamp_key(schema::CLOSEST_TIMESTAMP, timestamp));
    }

    pub fn remove_timestamp(&mut self, timestamp: u64) {
        self.remove(schema::timestamp_key(schema::TIMESTAMP_TO_HASHES, timestamp));
    }

    /// Drop `records_to_remove` entries from the tail of the amount
    /// enumeration, leaving `new_total` live ones.
    pub fn remove_key_output_amounts(
        &mut self,
        records_to_remove: u32,
        new_total: u32,
    ) -> Result<(), CacheError> {
        self.insert(
            schema::sub_key(schema::KEY_OUTPUT_AMOUNTS, schema::KEY_AMOUNTS_COUNT_KEY),
            &new_total,
        )?;
        for i in 0..records_to_remove {
            self.remove(schema::key_output_amount_enum_key(new_total + i));
        }
        Ok(())
    }

    pub fn remove_key_output_info(&mut self, amount: Amount, global_index: GlobalOutputIndex) {
        self.remove(schema::amount_index_key(
            schema::KEY_OUTPUT_INFO,
            amount,
            global_index,
        ));
    }
}

impl WriteBatch for BlockchainWriteBatch {
    fn extract(self) -> RawWriteBatch {
        self.raw
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_more_outputs_than_total_is_rejected() {
        let mut batch = BlockchainWriteBatch::new();
        let outputs = vec![
            PackedOutputReference {
                block_index: 1,
                transaction_index: 0,
                output_index: 0,
            };
            3
        ];
        assert!(matches!(
            batch.insert_key_output_global_indexes(100, &outputs, 2),
            Err(CacheError::InvariantViolation(_))
        ));
    }

    #[test]
    fn genesis_cannot_be_removed() {
        let mut batch = BlockchainWriteBatch::new();
        assert!(matches!(
            batch.remove_cached_block(&Hash::ZERO, 0),
            Err(CacheError::InvariantViolation(_))
        ));
    }

    #[test]
    fn operations_accumulate_in_order() {
        let mut batch = BlockchainWriteBatch::new();
        batch.insert_raw_block(7, &RawBlock::default()).unwrap();
        batch.remove_raw_block(8);

        let raw = batch.extract();
        assert_eq!(raw.to_insert.len(), 1);
        assert_eq!(raw.to_remove.len(), 1);
        assert_eq!(raw.to_insert[0].0, schema::block_index_key(schema::RAW_BLOCK_BY_INDEX, 7));
        assert_eq!(raw.to_remove[0], schema::block_index_key(schema::RAW_BLOCK_BY_INDEX, 8));
    }
}
