pub mod cache;
pub mod common;
pub mod config;
pub mod control;
pub mod scheduler;
pub mod spool;
pub mod suite;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::SpoolError;
pub type Result<T> = std::result::Result<T, Error>;

pub const BSPOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
