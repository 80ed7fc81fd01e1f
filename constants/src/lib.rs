#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod block;
pub mod difficulty;
pub mod money;
pub mod tx;
pub mod upgrade;
