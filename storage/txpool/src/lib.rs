#![doc = include_str!("../README.md")]

mod pool;
mod priority;
mod template;

pub use pool::{
    AddedToPool, PoolAddError, PoolTransaction, TransactionPool, TransactionValidator,
};
pub use priority::PriorityKey;
pub use template::BlockTemplate;
