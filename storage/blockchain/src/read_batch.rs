//! The typed read-batch builder.
//!
//! `request_*` calls register interest in keys; the database fills a
//! parallel vector of `(value, found)` pairs from one snapshot, and
//! [`BlockchainReadBatch::extract_result`] yields the typed result.
//! Absent keys are dropped from map-valued results and reported as
//! `(default, false)` for scalar-valued ones.

//---------------------------------------------------------------------------------------------------- Import
use std::collections::HashMap;

use azurite_database::{ReadBatch, RuntimeError};
use azurite_types::{
    from_blob, Amount, BlockIndex, GlobalOutputIndex, Hash, KeyImage, PaymentId, RawBlock,
};

use crate::{
    schema,
    types::{CachedBlockInfo, ExtendedTransactionInfo, KeyOutputInfo, PackedOutputReference},
};

//---------------------------------------------------------------------------------------------------- Requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    SpentKeyImagesByBlock(BlockIndex),
    BlockIndexBySpentKeyImage(KeyImage),
    CachedTransaction(Hash),
    TransactionHashesByBlock(BlockIndex),
    CachedBlock(BlockIndex),
    BlockIndexByBlockHash(Hash),
    KeyOutputCountForAmount(Amount),
    KeyOutputGlobalIndexForAmount(Amount, GlobalOutputIndex),
    RawBlock(BlockIndex),
    LastBlockIndex,
    ClosestTimestampBlockIndex(u64),
    KeyOutputAmountsCount,
    KeyOutputAmount(u32),
    TransactionCountByPaymentId(PaymentId),
    TransactionHashByPaymentId(PaymentId, u32),
    BlockHashesByTimestamp(u64),
    TransactionsCount,
    KeyOutputInfo(Amount, GlobalOutputIndex),
    DbSchemeVersion,
}

impl Request {
    fn raw_key(&self) -> Vec<u8> {
        match *self {
            Self::SpentKeyImagesByBlock(index) => {
                schema::block_index_key(schema::SPENT_KEY_IMAGES_BY_BLOCK, index)
            }
            Self::BlockIndexBySpentKeyImage(image) => schema::spent_key_image_key(&image),
            Self::CachedTransaction(hash) => schema::tx_info_key(&hash),
            Self::TransactionHashesByBlock(index) => {
                schema::block_index_key(schema::TX_HASHES_BY_BLOCK, index)
            }
            Self::CachedBlock(index) => schema::block_index_key(schema::BLOCK_INFO_BY_INDEX, index),
            Self::BlockIndexByBlockHash(hash) => {
                schema::hash_key(schema::BLOCK_INDEX_BY_HASH, &hash.0)
            }
            Self::KeyOutputCountForAmount(amount) => {
                schema::amount_key(schema::KEY_OUTPUT_AMOUNT, amount)
            }
            Self::KeyOutputGlobalIndexForAmount(amount, index) => {
                schema::amount_index_key(schema::KEY_OUTPUT_AMOUNT, amount, index)
            }
            Self::RawBlock(index) => schema::block_index_key(schema::RAW_BLOCK_BY_INDEX, index),
            Self::LastBlockIndex => schema::sub_key(schema::SCALARS, schema::LAST_BLOCK_INDEX_KEY),
            Self::ClosestTimestampBlockIndex(timestamp) => {
                schema::timestamp_key(schema::CLOSEST_TIMESTAMP, timestamp)
            }
            Self::KeyOutputAmountsCount => {
                schema::sub_key(schema::KEY_OUTPUT_AMOUNTS, schema::KEY_AMOUNTS_COUNT_KEY)
            }
            Self::KeyOutputAmount(index) => schema::key_output_amount_enum_key(index),
            Self::TransactionCountByPaymentId(id) => schema::payment_id_count_key(&id),
            Self::TransactionHashByPaymentId(id, index) => {
                schema::payment_id_index_key(&id, index)
            }
            Self::BlockHashesByTimestamp(timestamp) => {
                schema::timestamp_key(schema::TIMESTAMP_TO_HASHES, timestamp)
            }
            Self::TransactionsCount => {
                schema::sub_key(schema::TX_INFO_BY_HASH, schema::TXS_COUNT_KEY)
            }
            Self::KeyOutputInfo(amount, index) => {
                schema::amount_index_key(schema::KEY_OUTPUT_INFO, amount, index)
            }
            Self::DbSchemeVersion => {
                schema::sub_key(schema::DB_VERSION, schema::DB_SCHEME_VERSION_KEY)
            }
        }
    }
}

//---------------------------------------------------------------------------------------------------- Result
/// The typed view over one submitted read batch.
#[derive(Debug, Default)]
pub struct BlockchainReadResult {
    spent_key_images_by_block: HashMap<BlockIndex, Vec<KeyImage>>,
    block_indexes_by_key_image: HashMap<KeyImage, BlockIndex>,
    cached_transactions: HashMap<Hash, ExtendedTransactionInfo>,
    transaction_hashes_by_block: HashMap<BlockIndex, Vec<Hash>>,
    cached_blocks: HashMap<BlockIndex, CachedBlockInfo>,
    block_indexes_by_hash: HashMap<Hash, BlockIndex>,
    key_output_counts: HashMap<Amount, u32>,
    key_output_global_indexes: HashMap<(Amount, GlobalOutputIndex), PackedOutputReference>,
    raw_blocks: HashMap<BlockIndex, RawBlock>,
    closest_timestamp_block_index: HashMap<u64, BlockIndex>,
    key_output_amounts: HashMap<u32, Amount>,
    transaction_counts_by_payment_id: HashMap<PaymentId, u32>,
    transaction_hashes_by_payment_id: HashMap<(PaymentId, u32), Hash>,
    block_hashes_by_timestamp: HashMap<u64, Vec<Hash>>,
    key_output_info: HashMap<(Amount, GlobalOutputIndex), KeyOutputInfo>,

    last_block_index: (BlockIndex, bool),
    key_output_amounts_count: (u32, bool),
    transactions_count: (u64, bool),
    db_scheme_version: (u32, bool),
}

impl BlockchainReadResult {
    pub fn spent_key_images_by_block(&self) -> &HashMap<BlockIndex, Vec<KeyImage>> {
        &self.spent_key_images_by_block
    }

    pub fn block_indexes_by_key_image(&self) -> &HashMap<KeyImage, BlockIndex> {
        &self.block_indexes_by_key_image
    }

    pub fn cached_transactions(&self) -> &HashMap<Hash, ExtendedTransactionInfo> {
        &self.cached_transactions
    }

    pub fn transaction_hashes_by_block(&self) -> &HashMap<BlockIndex, Vec<Hash>> {
        &self.transaction_hashes_by_block
    }

    pub fn cached_blocks(&self) -> &HashMap<BlockIndex, CachedBlockInfo> {
        &self.cached_blocks
    }

    pub fn block_indexes_by_hash(&self) -> &HashMap<Hash, BlockIndex> {
        &self.block_indexes_by_hash
    }

    pub fn key_output_counts(&self) -> &HashMap<Amount, u32> {
        &self.key_output_counts
    }

    pub fn key_output_global_indexes(
        &self,
    ) -> &HashMap<(Amount, GlobalOutputIndex), PackedOutputReference> {
        &self.key_output_global_indexes
    }

    pub fn raw_blocks(&self) -> &HashMap<BlockIndex, RawBlock> {
        &self.raw_blocks
    }

    pub fn take_raw_blocks(&mut self) -> HashMap<BlockIndex, RawBlock> {
        std::mem::take(&mut self.raw_blocks)
    }

    pub fn closest_timestamp_block_index(&self) -> &HashMap<u64, BlockIndex> {
        &self.closest_timestamp_block_index
    }

    pub fn key_output_amounts(&self) -> &HashMap<u32, Amount> {
        &self.key_output_amounts
    }

    pub fn transaction_counts_by_payment_id(&self) -> &HashMap<PaymentId, u32> {
        &self.transaction_counts_by_payment_id
    }

    pub fn transaction_hashes_by_payment_id(&self) -> &HashMap<(PaymentId, u32), Hash> {
        &self.transaction_hashes_by_payment_id
    }

    pub fn block_hashes_by_timestamp(&self) -> &HashMap<u64, Vec<Hash>> {
        &self.block_hashes_by_timestamp
    }

    pub fn key_output_info(&self) -> &HashMap<(Amount, GlobalOutputIndex), KeyOutputInfo> {
        &self.key_output_info
    }

    /// `(value, present)`; the value is meaningless when absent.
    pub fn last_block_index(&self) -> (BlockIndex, bool) {
        self.last_block_index
    }

    pub fn key_output_amounts_count(&self) -> (u32, bool) {
        self.key_output_amounts_count
    }

    pub fn transactions_count(&self) -> (u64, bool) {
        self.transactions_count
    }

    pub fn db_scheme_version(&self) -> (u32, bool) {
        self.db_scheme_version
    }
}

//---------------------------------------------------------------------------------------------------- BlockchainReadBatch
/// Registers keys of interest, then decodes the store's answers.
#[derive(Debug, Default)]
pub struct BlockchainReadBatch {
    requests: Vec<Request>,
    result: Option<BlockchainReadResult>,
}

impl BlockchainReadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(mut self, request: Request) -> Self {
        self.requests.push(request);
        self
    }

    pub fn request_spent_key_images_by_block(self, block_index: BlockIndex) -> Self {
        self.request(Request::SpentKeyImagesByBlock(block_index))
    }

    pub fn request_block_index_by_spent_key_image(self, key_image: &KeyImage) -> Self {
        self.request(Request::BlockIndexBySpentKeyImage(*key_image))
    }

    pub fn request_cached_transaction(self, tx_hash: &Hash) -> Self {
        self.request(Request::CachedTransaction(*tx_hash))
    }

    pub fn request_transaction_hashes_by_block(self, block_index: BlockIndex) -> Self {
        self.request(Request::TransactionHashesByBlock(block_index))
    }

    pub fn request_cached_block(self, block_index: BlockIndex) -> Self {
        self.request(Request::CachedBlock(block_index))
    }

    pub fn request_block_index_by_block_hash(self, block_hash: &Hash) -> Self {
        self.request(Request::BlockIndexByBlockHash(*block_hash))
    }

    pub fn request_key_output_count_for_amount(self, amount: Amount) -> Self {
        self.request(Request::KeyOutputCountForAmount(amount))
    }

    pub fn request_key_output_global_index_for_amount(
        self,
        amount: Amount,
        index: GlobalOutputIndex,
    ) -> Self {
        self.request(Request::KeyOutputGlobalIndexForAmount(amount, index))
    }

    pub fn request_raw_block(self, block_index: BlockIndex) -> Self {
        self.request(Request::RawBlock(block_index))
    }

    pub fn request_last_block_index(self) -> Self {
        self.request(Request::LastBlockIndex)
    }

    pub fn request_closest_timestamp_block_index(self, timestamp: u64) -> Self {
        self.request(Request::ClosestTimestampBlockIndex(timestamp))
    }

    pub fn request_key_output_amounts_count(self) -> Self {
        self.request(Request::KeyOutputAmountsCount)
    }

    pub fn request_key_output_amount(self, index: u32) -> Self {
        self.request(Request::KeyOutputAmount(index))
    }

    pub fn request_transaction_count_by_payment_id(self, payment_id: &PaymentId) -> Self {
        self.request(Request::TransactionCountByPaymentId(*payment_id))
    }

    pub fn request_transaction_hash_by_payment_id(
        self,
        payment_id: &PaymentId,
        index: u32,
    ) -> Self {
        self.request(Request::TransactionHashByPaymentId(*payment_id, index))
    }

    pub fn request_block_hashes_by_timestamp(self, timestamp: u64) -> Self {
        self.request(Request::BlockHashesByTimestamp(timestamp))
    }

    pub fn request_transactions_count(self) -> Self {
        self.request(Request::TransactionsCount)
    }

    pub fn request_key_output_info(self, amount: Amount, index: GlobalOutputIndex) -> Self {
        self.request(Request::KeyOutputInfo(amount, index))
    }

    pub fn request_db_scheme_version(self) -> Self {
        self.request(Request::DbSchemeVersion)
    }

    /// The typed result. Fails with
    /// [`RuntimeError::ResultNotReady`] before submission.
    pub fn extract_result(self) -> Result<BlockchainReadResult, RuntimeError> {
        self.result.ok_or(RuntimeError::ResultNotReady)
    }
}

fn decode<T: bincode::Decode<()>>(value: &[u8]) -> Result<T, RuntimeError> {
    from_blob(value).map_err(|e| RuntimeError::Corrupt(e.to_string()))
}

impl ReadBatch for BlockchainReadBatch {
    fn raw_keys(&self) -> Vec<Vec<u8>> {
        self.requests.iter().map(Request::raw_key).collect()
    }

    fn submit_raw_result(
        &mut self,
        values: Vec<Vec<u8>>,
        found: Vec<bool>,
    ) -> Result<(), RuntimeError> {
        if values.len() != self.requests.len() || found.len() != self.requests.len() {
            return Err(RuntimeError::ResultLengthMismatch);
        }

        let mut result = BlockchainReadResult::default();

        for ((request, value), present) in self.requests.iter().zip(&values).zip(found) {
            match *request {
                Request::SpentKeyImagesByBlock(index) => {
                    if present {
                        result
                            .spent_key_images_by_block
                            .insert(index, decode(value)?);
                    }
                }
                Request::BlockIndexBySpentKeyImage(image) => {
                    if present {
                        result
                            .block_indexes_by_key_image
                            .insert(image, decode(value)?);
                    }
                }
                Request::CachedTransaction(hash) => {
                    if present {
                        result.cached_transactions.insert(hash, decode(value)?);
                    }
                }
                Request::TransactionHashesByBlock(index) => {
                    if present {
                        result
                            .transaction_hashes_by_block
                            .insert(index, decode(value)?);
                    }
                }
                Request::CachedBlock(index) => {
                    if present {
                        result.cached_blocks.insert(index, decode(value)?);
                    }
                }
                Request::BlockIndexByBlockHash(hash) => {
                    if present {
                        result.block_indexes_by_hash.insert(hash, decode(value)?);
                    }
                }
                Request::KeyOutputCountForAmount(amount) => {
                    if present {
                        result.key_output_counts.insert(amount, decode(value)?);
                    }
                }
                Request::KeyOutputGlobalIndexForAmount(amount, index) => {
                    if present {
                        result
                            .key_output_global_indexes
                            .insert((amount, index), decode(value)?);
                    }
                }
                Request::RawBlock(index) => {
                    if present {
                        result.raw_blocks.insert(index, decode(value)?);
                    }
                }
                Request::LastBlockIndex => {
                    result.last_block_index = if present {
                        (decode(value)?, true)
                    } else {
                        (0, false)
                    };
                }
                Request::ClosestTimestampBlockIndex(timestamp) => {
                    if present {
                        result
                            .closest_timestamp_block_index
                            .insert(timestamp, decode(value)?);
                    }
                }
                Request::KeyOutputAmountsCount => {
                    result.key_output_amounts_count = if present {
                        (decode(value)?, true)
                    } else {
                        (0, false)
                    };
                }
                Request::KeyOutputAmount(index) => {
                    if present {
                        result.key_output_amounts.insert(index, decode(value)?);
                    }
                }
                Request::TransactionCountByPaymentId(id) => {
                    if present {
                        result
                            .transaction_counts_by_payment_id
                            .insert(id, decode(value)?);
                    }
                }
                Request::TransactionHashByPaymentId(id, index) => {
                    if present {
                        result
                            .transaction_hashes_by_payment_id
                            .insert((id, index), decode(value)?);
                    }
                }
                Request::BlockHashesByTimestamp(timestamp) => {
                    if present {
                        result
                            .block_hashes_by_timestamp
                            .insert(timestamp, decode(value)?);
                    }
                }
                Request::TransactionsCount => {
                    result.transactions_count = if present {
                        (decode(value)?, true)
                    } else {
                        (0, false)
                    };
                }
                Request::KeyOutputInfo(amount, index) => {
                    if present {
                        result.key_output_info.insert((amount, index), decode(value)?);
                    }
                }
                Request::DbSchemeVersion => {
                    result.db_scheme_version = if present {
                        (decode(value)?, true)
                    } else {
                        (0, false)
                    };
                }
            }
        }

        self.result = Some(result);
        Ok(())
    }
}
