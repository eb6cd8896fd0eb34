//! Convenient imports for twopc.
//!
//! ```ignore
//! use twopc::prelude::*;
//!
//! let coordinator = Coordinator::ephemeral("node-a")?;
//! let tx = coordinator.begin(ContextId::new())?;
//! ```

// Main entry point
pub use crate::coordinator::{Coordinator, CoordinatorBuilder};
pub use crate::config::CoordinatorConfig;

// Error handling
pub use crate::error::{Error, Result};

// Transactions
pub use twopc_concurrency::{ContextId, Transaction, TransactionManager};

// Participant contract
pub use twopc_core::{
    BranchId, EndFlags, ExternalXid, PrepareVote, ResourceParticipant, ScanFlags, StartFlags,
    Synchronization, TransactionStatus, XaError,
};

// Durability
pub use twopc_durability::DurabilityMode;
