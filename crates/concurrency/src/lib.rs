//! Coordination layer for twopc
//!
//! This crate implements the two-phase commit protocol with:
//! - [`Transaction`]: enlistment, join, prepare, commit and rollback of participants
//! - [`TransactionManager`]: the current transaction per [`ContextId`]
//! - [`recover`]: resolving in-doubt branches after a crash
//! - [`CompletionListener`]: system callbacks fired when a transaction completes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod listener;
pub mod manager;
pub mod recovery;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::ContextId;
pub use listener::CompletionListener;
pub use manager::{ManagerMetrics, TransactionManager};
pub use recovery::{recover, RecoveryReport};
pub use transaction::{Transaction, TransactionResource};
