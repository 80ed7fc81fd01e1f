#![doc = include_str!("../README.md")]

mod cache;
mod error;
mod queries;
mod read_batch;
mod rebuild;
mod schema;
mod shuffle;
mod split;
mod types;
mod write_batch;

pub use cache::{BlockchainCache, BLOCK_INFO_WINDOW};
pub use error::{CacheError, ExtractOutputKeysError};
pub use read_batch::{BlockchainReadBatch, BlockchainReadResult};
pub use types::{
    CachedBlockInfo, ExtendedTransactionInfo, KeyOutputInfo, PackedOutputReference,
    PushedBlockInfo, SplitSegment, ValidatorState,
};
pub use write_batch::BlockchainWriteBatch;

/// The schema version written on first open. Opening a store with a
/// lower version rebuilds every index from the raw-block records; a
/// higher version refuses to open.
pub const DB_SCHEME_VERSION: u32 = 2;
