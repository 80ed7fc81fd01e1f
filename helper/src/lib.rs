#![doc = include_str!("../README.md")]

#[cfg(feature = "num")]
pub mod num;

#[cfg(feature = "time")]
pub mod time;
