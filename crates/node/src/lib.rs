#![doc = include_str!("../README.md")]
#[cfg(feature = "node")]
pub mod config;
pub mod error;
pub mod logging;
#[cfg(feature = "node")]
pub mod processor;
pub mod util;
