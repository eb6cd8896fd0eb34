//! Transaction store contract
//!
//! The coordinator calls the store at every state transition. Only a few of
//! those calls matter for crash recovery:
//!
//! | Call | Recovery-critical |
//! |------|-------------------|
//! | `next_transaction_number` | yes |
//! | `is_committing` | yes |
//! | `record_*(Committing / Committed / RolledBack)` | yes |
//! | `record_*(anything else)` | no, diagnostic only |
//! | `cleanup` | no, may be a no-op |
//!
//! A store may silently drop every diagnostic record. A store must never
//! drop a recovery-critical one.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use twopc_core::{BranchId, GlobalId};

/// Status written to the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Transaction or branch started
    Active,
    /// Prepare requested
    Preparing,
    /// Prepare succeeded
    Prepared,
    /// Commit decision made
    Committing,
    /// Commit completed
    Committed,
    /// Commit attempted but a participant failed
    CommitFailed,
    /// Rollback started
    RollingBack,
    /// Rollback completed
    RolledBack,
    /// Rollback attempted but a participant failed
    RollbackFailed,
}

impl LogStatus {
    /// Check if recovery depends on this record being durable.
    pub fn is_recovery_critical(&self) -> bool {
        matches!(
            self,
            LogStatus::Committing | LogStatus::Committed | LogStatus::RolledBack
        )
    }

    /// Check if the commit decision has been made.
    ///
    /// Once a global id reaches any of these, pending branches must be committed.
    pub fn is_commit_decision(&self) -> bool {
        matches!(
            self,
            LogStatus::Committing | LogStatus::Committed | LogStatus::CommitFailed
        )
    }

    /// Check if the record may be garbage collected.
    ///
    /// Failed outcomes are terminal but kept for operators.
    pub fn is_collectable(&self) -> bool {
        matches!(self, LogStatus::Committed | LogStatus::RolledBack)
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Active => "active",
            LogStatus::Preparing => "preparing",
            LogStatus::Prepared => "prepared",
            LogStatus::Committing => "committing",
            LogStatus::Committed => "committed",
            LogStatus::CommitFailed => "commit_failed",
            LogStatus::RollingBack => "rolling_back",
            LogStatus::RolledBack => "rolled_back",
            LogStatus::RollbackFailed => "rollback_failed",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the transaction log.
///
/// `branch_seq` and `resource_manager` are `None` for global-level records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Coordinator identity
    pub coordinator_id: String,
    /// Transaction number
    pub tx_number: u64,
    /// Branch sequence number for branch-level records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_seq: Option<u64>,
    /// Resource manager name for branch-level records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_manager: Option<String>,
    /// Recorded status
    pub status: LogStatus,
    /// Failure cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl LogRecord {
    /// Global-level record.
    pub fn global(gid: &GlobalId, status: LogStatus, cause: Option<&str>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            coordinator_id: gid.coordinator_id().to_string(),
            tx_number: gid.tx_number(),
            branch_seq: None,
            resource_manager: None,
            status,
            cause: cause.map(str::to_string),
        }
    }

    /// Branch-level record.
    pub fn branch(
        branch: &BranchId,
        resource_manager: &str,
        status: LogStatus,
        cause: Option<&str>,
    ) -> Self {
        Self {
            branch_seq: Some(branch.branch_seq()),
            resource_manager: Some(resource_manager.to_string()),
            ..Self::global(branch.global(), status, cause)
        }
    }

    /// Check if this is a global-level record.
    pub fn is_global(&self) -> bool {
        self.branch_seq.is_none()
    }
}

/// Transaction store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data failed validation
    #[error("corrupt log: {0}")]
    Corrupt(String),

    /// Backend unavailable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable log consulted by the coordinator.
pub trait TransactionStore: Send + Sync {
    /// Allocate a transaction number.
    ///
    /// Strictly increasing over the store's lifetime, across restarts.
    fn next_transaction_number(&self) -> StoreResult<u64>;

    /// Whether the global parent of `branch` reached the commit decision.
    ///
    /// Used only by recovery to decide between commit and rollback.
    fn is_committing(&self, branch: &BranchId) -> StoreResult<bool>;

    /// Record a global-level transition.
    fn record_global(
        &self,
        gid: &GlobalId,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()>;

    /// Record a branch-level transition for one resource manager.
    fn record_branch(
        &self,
        branch: &BranchId,
        resource_manager: &str,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()>;

    /// Garbage-collect fully terminal records.
    ///
    /// Must never remove a record that is still in flight.
    fn cleanup(&self) -> StoreResult<()> {
        Ok(())
    }
}
