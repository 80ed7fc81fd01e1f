//! `redb` backend.

//---------------------------------------------------------------------------------------------------- Import
use std::path::Path;

use redb::{ReadableTable, TableDefinition};

use crate::{Database, InitError, RawWriteBatch, ReadBatch, RuntimeError, WriteBatch};

//---------------------------------------------------------------------------------------------------- Constants
/// The single table every semantic index shares; prefix bytes
/// partition the key space.
const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("azurite");

//---------------------------------------------------------------------------------------------------- RedbDatabase
/// A [`Database`] over a `redb` environment.
pub struct RedbDatabase {
    env: redb::Database,
}

impl RedbDatabase {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, InitError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let env = redb::Database::create(path)?;
        Ok(Self { env })
    }

    /// An ephemeral store for tests.
    #[cfg(any(test, feature = "redb-memory"))]
    pub fn in_memory() -> Result<Self, InitError> {
        let env = redb::Builder::new()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        Ok(Self { env })
    }
}

impl Database for RedbDatabase {
    fn read<B: ReadBatch>(&self, batch: &mut B) -> Result<(), RuntimeError> {
        let keys = batch.raw_keys();
        let mut values = Vec::with_capacity(keys.len());
        let mut found = Vec::with_capacity(keys.len());

        let tx = self.env.begin_read()?;
        match tx.open_table(TABLE) {
            Ok(table) => {
                for key in &keys {
                    match table.get(key.as_slice())? {
                        Some(guard) => {
                            values.push(guard.value().to_vec());
                            found.push(true);
                        }
                        None => {
                            values.push(Vec::new());
                            found.push(false);
                        }
                    }
                }
            }
            // A fresh environment has no table yet; every key is absent.
            Err(redb::TableError::TableDoesNotExist(_)) => {
                values = vec![Vec::new(); keys.len()];
                found = vec![false; keys.len()];
            }
            Err(e) => return Err(e.into()),
        }

        batch.submit_raw_result(values, found)
    }

    fn write<W: WriteBatch>(&self, batch: W) -> Result<(), RuntimeError> {
        let RawWriteBatch {
            to_insert,
            to_remove,
        } = batch.extract();

        let tx = self.env.begin_write()?;
        {
            let mut table = tx.open_table(TABLE)?;
            for (key, value) in &to_insert {
                table.insert(key.as_slice(), value.as_slice())?;
            }
            for key in &to_remove {
                table.remove(key.as_slice())?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn for_each_prefixed(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<(), RuntimeError> {
        let tx = self.env.begin_read()?;
        let table = match tx.open_table(TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in table.range(prefix..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix) {
                break;
            }
            f(key.value(), value.value());
        }
        Ok(())
    }
}
