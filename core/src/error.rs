//! Core error types.

use azurite_blockchain::{CacheError, ExtractOutputKeysError};
use azurite_consensus_rules::{BlockError, MinerTxError, TransactionError};
use azurite_txpool::PoolAddError;
use azurite_types::{BlobError, Hash, KeyImage};

//---------------------------------------------------------------------------------------------------- CoreError
/// Everything the core can reject an incoming block or transaction
/// with, plus the fatal kinds that stop the node.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The blob failed deserialization; dropped, not retried.
    #[error("failed to parse blob: {0}")]
    Parse(#[from] BlobError),

    /// The block's parent is known on neither the main nor an
    /// alternative chain.
    #[error("orphan block: parent {0} is unknown")]
    Orphan(Hash),

    /// The alternative block forks off deeper than the reorg depth
    /// budget allows.
    #[error("alternative block at height {height} is too deep below the top {top}")]
    AltBlockTooDeep { height: u32, top: u32 },

    /// A reorganization would cross the highest checkpoint.
    #[error("reorganization below checkpoint height {0} refused")]
    ReorgBelowCheckpoint(u32),

    /// A block names a pool transaction the pool does not hold.
    #[error("transaction {0} is not in the pool")]
    MissingPoolTx(Hash),

    #[error("block validation failed: {0}")]
    Block(#[from] BlockError),

    #[error("coinbase validation failed: {0}")]
    MinerTx(#[from] MinerTxError),

    #[error("transaction validation failed: {0}")]
    Transaction(#[from] TransactionError),

    /// A transaction input references an output that is still locked.
    #[error("transaction input references a locked output")]
    OutputLocked,

    /// A transaction input references a global index out of range.
    #[error("transaction input references an invalid global index")]
    InvalidGlobalIndex,

    /// A key image was already seen on the main chain.
    #[error("transaction double-spends key image {0}")]
    DoubleSpend(KeyImage),

    #[error("pool rejected the transaction: {0}")]
    Pool(#[from] PoolAddError),

    /// Storage or internal-consistency failure; surfaced to the
    /// operator, nothing was committed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<ExtractOutputKeysError> for CoreError {
    fn from(e: ExtractOutputKeysError) -> Self {
        match e {
            ExtractOutputKeysError::OutputLocked => Self::OutputLocked,
            ExtractOutputKeysError::InvalidGlobalIndex => Self::InvalidGlobalIndex,
            ExtractOutputKeysError::Cache(e) => Self::Cache(e),
        }
    }
}
