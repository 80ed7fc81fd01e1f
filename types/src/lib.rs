#![doc = include_str!("../README.md")]

mod block;
mod blob;
mod extra;
mod primitives;
mod transaction;

pub use block::{Block, BlockHeader, CachedBlock, RawBlock};
pub use blob::{from_blob, hash_bytes, to_blob, tree_hash, BlobError};
pub use extra::{
    build_extra, payment_id_from_extra, pubkey_from_extra, ExtraField, ExtraFieldIter,
};
pub use primitives::{Hash, KeyImage, PaymentId, PublicKey, Signature};
pub use transaction::{
    absolute_output_indexes, CachedTransaction, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget,
};

/// The public denomination on an output.
pub type Amount = u64;

/// Height of a block in the main chain, genesis = 0.
pub type BlockIndex = u32;

/// Dense index within all key outputs of a given [`Amount`].
pub type GlobalOutputIndex = u32;

/// Per-block work unit; summed along the chain it selects the
/// canonical tip.
pub type Difficulty = u64;
