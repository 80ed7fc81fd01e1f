//! Database error types.

//---------------------------------------------------------------------------------------------------- InitError
/// Errors when opening the database environment.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "redb")]
    #[error("failed to open the database: {0}")]
    Open(#[from] redb::DatabaseError),
}

//---------------------------------------------------------------------------------------------------- RuntimeError
/// Errors from an open database.
///
/// Any of these rolls the current operation back; no batch is
/// partially committed.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("a read batch result was submitted with mismatched lengths")]
    ResultLengthMismatch,

    #[error("a read batch result was extracted before submission")]
    ResultNotReady,

    #[error("stored record failed to decode: {0}")]
    Corrupt(String),

    #[cfg(feature = "redb")]
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[cfg(feature = "redb")]
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[cfg(feature = "redb")]
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[cfg(feature = "redb")]
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}
