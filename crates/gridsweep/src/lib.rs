pub mod commands;
pub mod common;
pub mod config;
pub mod sweep;
pub mod worker;

pub type Error = crate::common::error::SweepError;
pub type Result<T> = std::result::Result<T, Error>;

pub const GRIDSWEEP_VERSION: &str = env!("CARGO_PKG_VERSION");
