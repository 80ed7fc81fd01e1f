//! Cache error types.

use azurite_database::RuntimeError;
use azurite_types::BlobError;

//---------------------------------------------------------------------------------------------------- CacheError
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The underlying KV engine failed; the current operation was
    /// rolled back.
    #[error("storage error: {0}")]
    Database(#[from] RuntimeError),

    /// A stored blob failed to (de)serialize.
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// Internal consistency broken; the cache refuses further writes.
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    /// The store was written by a newer schema than this build knows.
    #[error("DB scheme version {found} is newer than supported {supported}")]
    SchemeVersionTooNew { found: u32, supported: u32 },
}

//---------------------------------------------------------------------------------------------------- ExtractOutputKeysError
/// Why a requested set of ring members could not be extracted.
#[derive(Debug, thiserror::Error)]
pub enum ExtractOutputKeysError {
    #[error("an output in the request is still locked")]
    OutputLocked,
    #[error("a global index in the request is out of range")]
    InvalidGlobalIndex,
    #[error(transparent)]
    Cache(#[from] CacheError),
}
