//! Blocks.

//---------------------------------------------------------------------------------------------------- Import
use bincode::{Decode, Encode};

use crate::{
    blob::{from_blob, hash_bytes, to_blob, tree_hash, write_varint, BlobError},
    transaction::Transaction,
    CachedTransaction, Hash,
};

//---------------------------------------------------------------------------------------------------- Header
/// A block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous: Hash,
    pub nonce: u32,
}

//---------------------------------------------------------------------------------------------------- Block
/// A parsed block: header, coinbase, and the hashes of the other
/// transactions it confirms.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub coinbase: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl Block {
    /// The blob the block hash and proof-of-work are computed over:
    /// serialized header ∥ Merkle root over (coinbase hash ∥ other tx
    /// hashes) ∥ varint tx count.
    pub fn hashing_blob(&self) -> Result<Vec<u8>, BlobError> {
        let mut blob = to_blob(&self.header)?;

        let coinbase_hash = hash_bytes(&to_blob(&self.coinbase)?);
        let mut hashes = Vec::with_capacity(1 + self.transaction_hashes.len());
        hashes.push(coinbase_hash);
        hashes.extend_from_slice(&self.transaction_hashes);

        blob.extend_from_slice(&tree_hash(&hashes).0);
        write_varint(&mut blob, hashes.len() as u64);
        Ok(blob)
    }
}

//---------------------------------------------------------------------------------------------------- CachedBlock
/// A block plus its memoized blobs and hash.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    block: Block,
    block_blob: Vec<u8>,
    hash: Hash,
}

impl CachedBlock {
    /// Parse a block blob.
    pub fn from_blob(block_blob: Vec<u8>) -> Result<Self, BlobError> {
        let block: Block = from_blob(&block_blob)?;
        Self::from_parsed(block, block_blob)
    }

    fn from_parsed(block: Block, block_blob: Vec<u8>) -> Result<Self, BlobError> {
        let hash = hash_bytes(&block.hashing_blob()?);
        Ok(Self {
            block,
            block_blob,
            hash,
        })
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn blob(&self) -> &[u8] {
        &self.block_blob
    }

    /// The block's identity, computed over its hashing blob.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Memoized coinbase wrapped for hashing/pool interop.
    pub fn cached_coinbase(&self) -> Result<CachedTransaction, BlobError> {
        CachedTransaction::try_from(self.block.coinbase.clone())
    }
}

impl TryFrom<Block> for CachedBlock {
    type Error = BlobError;

    fn try_from(block: Block) -> Result<Self, BlobError> {
        let blob = to_blob(&block)?;
        Self::from_parsed(block, blob)
    }
}

//---------------------------------------------------------------------------------------------------- RawBlock
/// The exact bytes a block and its non-coinbase transactions arrived
/// in, stored verbatim for rebroadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct RawBlock {
    pub block: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl RawBlock {
    /// Serialized size of the block plus all its transaction blobs.
    pub fn size(&self) -> usize {
        self.block.len() + self.transactions.iter().map(Vec::len).sum::<usize>()
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod test {
    use super::*;
    use crate::TransactionInput;

    fn coinbase(height: u32) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: u64::from(height) + 6,
            inputs: vec![TransactionInput::Coinbase { height }],
            outputs: vec![],
            extra: vec![],
            signatures: vec![],
        }
    }

    fn block(height: u32) -> Block {
        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: 1000,
                previous: Hash::ZERO,
                nonce: 42,
            },
            coinbase: coinbase(height),
            transaction_hashes: vec![],
        }
    }

    #[test]
    fn reparsed_blob_hashes_identically() {
        let cached = CachedBlock::try_from(block(1)).unwrap();
        let reparsed = CachedBlock::from_blob(cached.blob().to_vec()).unwrap();
        assert_eq!(reparsed.hash(), cached.hash());
        assert_eq!(reparsed.block(), cached.block());
    }

    #[test]
    fn hash_covers_transaction_hashes() {
        let mut b = block(1);
        let h1 = *CachedBlock::try_from(b.clone()).unwrap().hash();
        b.transaction_hashes.push(Hash([9; 32]));
        let h2 = *CachedBlock::try_from(b).unwrap().hash();
        assert_ne!(h1, h2);
    }

    #[test]
    fn nonce_changes_hash() {
        let mut b = block(1);
        let h1 = *CachedBlock::try_from(b.clone()).unwrap().hash();
        b.header.nonce += 1;
        let h2 = *CachedBlock::try_from(b).unwrap().hash();
        assert_ne!(h1, h2);
    }
}
