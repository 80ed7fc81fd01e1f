//! Node configuration.

//---------------------------------------------------------------------------------------------------- Import
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use azurite_types::{BlockIndex, Hash};

//---------------------------------------------------------------------------------------------------- Config
/// Core-relevant node configuration, loadable from a TOML file and
/// overridable from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Where the persistent store lives.
    pub data_dir: PathBuf,
    /// Switches the genesis block and store file naming.
    pub testnet: bool,
    /// Extra checkpoints as `INDEX:HASH` strings.
    pub checkpoints: Vec<CheckpointEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("azurite"),
            testnet: false,
            checkpoints: Vec::new(),
        }
    }
}

impl Config {
    /// The store file within the data directory; testnet stores get
    /// their own prefix so the two chains never share files.
    pub fn store_path(&self) -> PathBuf {
        let name = if self.testnet {
            "testnet_blockchain.redb"
        } else {
            "blockchain.redb"
        };
        self.data_dir.join(name)
    }
}

//---------------------------------------------------------------------------------------------------- CheckpointEntry
/// One `INDEX:HASH` checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointEntry {
    pub index: BlockIndex,
    pub hash: Hash,
}

impl TryFrom<String> for CheckpointEntry {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

impl From<CheckpointEntry> for String {
    fn from(entry: CheckpointEntry) -> Self {
        format!("{}:{}", entry.index, entry.hash)
    }
}

impl std::str::FromStr for CheckpointEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let (index, hash) = s
            .split_once(':')
            .ok_or_else(|| format!("checkpoint `{s}` is not INDEX:HASH"))?;
        Ok(Self {
            index: index
                .parse()
                .map_err(|e| format!("bad checkpoint index: {e}"))?,
            hash: Hash::from_hex(hash).map_err(|e| format!("bad checkpoint hash: {e}"))?,
        })
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_entry_parses() {
        let entry: CheckpointEntry = format!("1100:{}", "ab".repeat(32)).parse().unwrap();
        assert_eq!(entry.index, 1100);
        assert_eq!(entry.hash, Hash([0xab; 32]));

        assert!("notanumber:00".parse::<CheckpointEntry>().is_err());
        assert!("5".parse::<CheckpointEntry>().is_err());
    }

    #[test]
    fn testnet_store_gets_its_own_file() {
        let mainnet = Config::default();
        let testnet = Config {
            testnet: true,
            ..Config::default()
        };
        assert_ne!(mainnet.store_path(), testnet.store_path());
    }
}
