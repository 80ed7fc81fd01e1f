#![doc = include_str!("../README.md")]

mod error;
#[cfg(feature = "redb")]
mod redb_backend;

pub use error::{InitError, RuntimeError};
#[cfg(feature = "redb")]
pub use redb_backend::RedbDatabase;

//---------------------------------------------------------------------------------------------------- WriteBatch
/// The raw operations extracted from a write-batch builder.
#[derive(Debug, Default)]
pub struct RawWriteBatch {
    /// Key/value pairs to insert, in builder order.
    pub to_insert: Vec<(Vec<u8>, Vec<u8>)>,
    /// Keys to remove, in builder order.
    pub to_remove: Vec<Vec<u8>>,
}

impl RawWriteBatch {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_insert.len() + self.to_remove.len()
    }
}

/// A builder that turns semantic mutations into raw KV operations.
///
/// Callers must not insert and remove the same key within one batch;
/// the store applies inserts before removes without deduplication.
pub trait WriteBatch {
    /// Consume the builder, yielding the raw operations.
    fn extract(self) -> RawWriteBatch;
}

impl WriteBatch for RawWriteBatch {
    fn extract(self) -> RawWriteBatch {
        self
    }
}

//---------------------------------------------------------------------------------------------------- ReadBatch
/// A builder that registers interest in keys, then receives their
/// values back in one submission.
pub trait ReadBatch {
    /// The serialized keys to look up, in registration order.
    fn raw_keys(&self) -> Vec<Vec<u8>>;

    /// Receive one `(value, found)` pair per key of [`Self::raw_keys`],
    /// in the same order. Values for absent keys are empty.
    fn submit_raw_result(
        &mut self,
        values: Vec<Vec<u8>>,
        found: Vec<bool>,
    ) -> Result<(), RuntimeError>;
}

//---------------------------------------------------------------------------------------------------- Database
/// An ordered byte-key/byte-value store with batched atomic writes and
/// multi-key reads.
pub trait Database {
    /// Fill `batch` from a single read snapshot.
    fn read<B: ReadBatch>(&self, batch: &mut B) -> Result<(), RuntimeError>;

    /// Apply every operation of `batch` atomically: either all inserts
    /// and removes land, or none do.
    fn write<W: WriteBatch>(&self, batch: W) -> Result<(), RuntimeError>;

    /// Iterate every `(key, value)` whose key starts with `prefix`, in
    /// lexicographic key order.
    fn for_each_prefixed(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<(), RuntimeError>;
}

impl<D: Database> Database for &D {
    fn read<B: ReadBatch>(&self, batch: &mut B) -> Result<(), RuntimeError> {
        (**self).read(batch)
    }

    fn write<W: WriteBatch>(&self, batch: W) -> Result<(), RuntimeError> {
        (**self).write(batch)
    }

    fn for_each_prefixed(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<(), RuntimeError> {
        (**self).for_each_prefixed(prefix, f)
    }
}
