//! Transaction status as seen by callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a transaction.
///
/// ```text
/// Active → Preparing → Prepared → Committing → Committed
///    │          │          │           │
///    └──────────┴──────────┴───────────┴──→ MarkedRollback → RollingBack → RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// No transaction is associated with the execution context
    NoTransaction,
    /// Accepting enlistments
    Active,
    /// Will be rolled back; commit is no longer possible
    MarkedRollback,
    /// Prepare phase in progress
    Preparing,
    /// Every participant voted to commit
    Prepared,
    /// Commit phase in progress
    Committing,
    /// Terminal: committed
    Committed,
    /// Rollback in progress
    RollingBack,
    /// Terminal: rolled back
    RolledBack,
}

impl TransactionStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::NoTransaction => "no_transaction",
            TransactionStatus::Active => "active",
            TransactionStatus::MarkedRollback => "marked_rollback",
            TransactionStatus::Preparing => "preparing",
            TransactionStatus::Prepared => "prepared",
            TransactionStatus::Committing => "committing",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RollingBack => "rolling_back",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
