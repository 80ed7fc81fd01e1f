//! The key space.
//!
//! Each semantic index owns a one-byte ASCII prefix; composite keys
//! append big-endian integers so lexicographic order equals numeric
//! order. Two prefixes are overloaded on key length: under `'b'` a
//! 9-byte key holds the per-amount count and a 13-byte key holds one
//! packed output reference, and `'a'`/`'f'`/`'h'` similarly mix their
//! scalar sub-keys with record keys of a different length.

//---------------------------------------------------------------------------------------------------- Import
use azurite_types::{Amount, BlockIndex, GlobalOutputIndex, Hash, KeyImage, PaymentId};

//---------------------------------------------------------------------------------------------------- Prefixes
pub const SPENT_KEY_IMAGES_BY_BLOCK: u8 = b'0';
pub const TX_HASHES_BY_BLOCK: u8 = b'1';
pub const RAW_BLOCK_BY_INDEX: u8 = b'4';
pub const BLOCK_INDEX_BY_HASH: u8 = b'5';
pub const BLOCK_INFO_BY_INDEX: u8 = b'6';
pub const BLOCK_INDEX_BY_KEY_IMAGE: u8 = b'7';
pub const SCALARS: u8 = b'8';
pub const DB_VERSION: u8 = b'9';
pub const TX_INFO_BY_HASH: u8 = b'a';
pub const KEY_OUTPUT_AMOUNT: u8 = b'b';
pub const CLOSEST_TIMESTAMP: u8 = b'e';
pub const PAYMENT_ID: u8 = b'f';
pub const TIMESTAMP_TO_HASHES: u8 = b'g';
pub const KEY_OUTPUT_AMOUNTS: u8 = b'h';
pub const KEY_OUTPUT_INFO: u8 = b'j';

//---------------------------------------------------------------------------------------------------- Sub-keys
pub const LAST_BLOCK_INDEX_KEY: &[u8] = b"last_block_index";
pub const TXS_COUNT_KEY: &[u8] = b"txs_count";
pub const KEY_AMOUNTS_COUNT_KEY: &[u8] = b"key_amounts_count";
pub const DB_SCHEME_VERSION_KEY: &[u8] = b"db_scheme_version";

//---------------------------------------------------------------------------------------------------- Key builders
pub fn block_index_key(prefix: u8, index: BlockIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(prefix);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn hash_key(prefix: u8, hash: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix);
    key.extend_from_slice(hash);
    key
}

pub fn timestamp_key(prefix: u8, timestamp: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key
}

pub fn sub_key(prefix: u8, name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(prefix);
    key.extend_from_slice(name);
    key
}

/// `(prefix, amount)`: the count scalar of a per-amount family.
pub fn amount_key(prefix: u8, amount: Amount) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&amount.to_be_bytes());
    key
}

/// `(prefix, amount, index)`: one record of a per-amount family.
pub fn amount_index_key(prefix: u8, amount: Amount, index: GlobalOutputIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(13);
    key.push(prefix);
    key.extend_from_slice(&amount.to_be_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn payment_id_index_key(payment_id: &PaymentId, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(PAYMENT_ID);
    key.extend_from_slice(&payment_id.0);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn spent_key_image_key(key_image: &KeyImage) -> Vec<u8> {
    hash_key(BLOCK_INDEX_BY_KEY_IMAGE, &key_image.0)
}

pub fn payment_id_count_key(payment_id: &PaymentId) -> Vec<u8> {
    hash_key(PAYMENT_ID, &payment_id.0)
}

pub fn tx_info_key(tx_hash: &Hash) -> Vec<u8> {
    hash_key(TX_INFO_BY_HASH, &tx_hash.0)
}

/// `('h', index)`: the enumeration of amounts that have key outputs.
pub fn key_output_amount_enum_key(index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(KEY_OUTPUT_AMOUNTS);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_key_shapes() {
        // The count key and the per-index key share the prefix and
        // never collide: they differ in length.
        let count = amount_key(KEY_OUTPUT_AMOUNT, 1000);
        let record = amount_index_key(KEY_OUTPUT_AMOUNT, 1000, 0);
        assert_eq!(count.len(), 9);
        assert_eq!(record.len(), 13);
        assert!(record.starts_with(&count));
        assert_ne!(count, record);
    }

    #[test]
    fn big_endian_keys_sort_numerically() {
        let lo = block_index_key(BLOCK_INFO_BY_INDEX, 255);
        let hi = block_index_key(BLOCK_INFO_BY_INDEX, 256);
        assert!(lo < hi);

        let lo = amount_index_key(KEY_OUTPUT_AMOUNT, 7, 9);
        let hi = amount_index_key(KEY_OUTPUT_AMOUNT, 7, 10);
        assert!(lo < hi);
    }

    #[test]
    fn scalar_sub_keys_cannot_collide_with_records() {
        // 32-byte hashes give 33-byte keys; the ascii sub-key is 10.
        assert_ne!(
            sub_key(TX_INFO_BY_HASH, TXS_COUNT_KEY).len(),
            tx_info_key(&Hash::ZERO).len()
        );
    }
}
