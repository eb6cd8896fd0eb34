//! # twopc
//!
//! Two-phase commit coordinator with crash recovery.
//!
//! twopc drives a global unit of work across several independent resource
//! managers (databases, queues) so that either every participant commits or
//! every participant rolls back, and resolves in-doubt work after a crash
//! from a durable transaction log.
//!
//! ## Quick Start
//!
//! ```ignore
//! use twopc::prelude::*;
//!
//! // Open a coordinator with a file-backed log
//! let coordinator = Coordinator::open("orders-node-1", "./txlog")?;
//!
//! // Resolve in-doubt branches before serving traffic
//! coordinator.recover_all(&[orders_db.clone(), billing_db.clone()])?;
//!
//! // One transaction per execution context
//! let ctx = ContextId::new();
//! let tx = coordinator.begin(ctx)?;
//! tx.enlist(orders_db.clone())?;
//! tx.enlist(billing_db.clone())?;
//! coordinator.commit(ctx)?;
//! ```
//!
//! ## Layers
//!
//! - [`twopc_core`] - global and branch identifiers, participant contract, errors
//! - [`twopc_durability`] - transaction log contract and its memory/file backends
//! - [`twopc_concurrency`] - the transaction state machine, manager and recovery
//!
//! Participants are adapters implementing [`ResourceParticipant`]; the
//! coordinator never talks to a resource manager any other way.

#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;

pub mod prelude;

// Re-export main entry points
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{Error, Result};

// Re-export the protocol surface
pub use twopc_concurrency::{
    CompletionListener, ContextId, ManagerMetrics, RecoveryReport, Transaction,
    TransactionManager, TransactionResource,
};
pub use twopc_core::{
    filter_recovery, BranchId, EndFlags, ExternalXid, GlobalId, PrepareVote,
    ResourceParticipant, ScanFlags, StartFlags, SyncError, Synchronization, TransactionStatus,
    XaError, FORMAT_ID,
};
pub use twopc_durability::{
    DurabilityMode, FileStore, InMemoryStore, LogRecord, LogStatus, StoreError,
    TransactionStore,
};

// Re-export the layer crates for advanced use
pub use twopc_concurrency;
pub use twopc_core;
pub use twopc_durability;
