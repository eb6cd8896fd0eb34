//! Durability layer for the twopc coordinator
//!
//! This crate implements the transaction log:
//! - [`TransactionStore`]: the contract the coordinator calls at every transition
//! - [`LogStatus`] / [`LogRecord`]: what gets recorded
//! - [`InMemoryStore`]: no persistence, for tests and presumed-abort setups
//! - [`FileStore`]: one checksummed log file per global transaction
//! - [`DurabilityMode`]: when the file store fsyncs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durability;
pub mod file;
pub mod memory;
pub mod store;

pub use durability::DurabilityMode;
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{LogRecord, LogStatus, StoreError, StoreResult, TransactionStore};
