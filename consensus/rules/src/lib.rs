#![doc = include_str!("../README.md")]

pub mod blocks;
pub mod currency;
pub mod difficulty;
pub mod genesis;
pub mod hard_forks;
pub mod miner_tx;
pub mod transactions;

pub use blocks::{check_block_pow, BlockError, PowHasher};
pub use currency::{Currency, CurrencyBuilder};
pub use hard_forks::{UpgradeDetector, UpgradeManager};
pub use miner_tx::MinerTxError;
pub use transactions::{RingSignatureVerifier, RingVerifier, TransactionError};
