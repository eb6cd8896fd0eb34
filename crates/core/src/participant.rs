//! Contracts implemented by resource adapters and application observers
//!
//! A [`ResourceParticipant`] is one resource manager's handle (a database
//! connection, a broker session, ...) wrapped by an adapter that also reports
//! the metadata the coordinator needs: a display name and whether the
//! resource manager can join an existing branch.
//!
//! Participant calls are synchronous. The coordinator never pre-empts a call
//! that hangs; a timeout is only forwarded to participants that enforce their
//! own deadline.

use crate::error::XaError;
use crate::ids::{BranchId, ExternalXid};
use crate::status::TransactionStatus;

/// Flags passed to [`ResourceParticipant::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlags {
    /// Start a new branch
    NoFlags,
    /// Associate with an already started branch on the same resource manager
    Join,
    /// Resume a suspended association
    Resume,
}

/// Flags passed to [`ResourceParticipant::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlags {
    /// Branch work completed successfully
    Success,
    /// Branch work failed; the branch will be rolled back
    Fail,
    /// Association is suspended, not ended
    Suspend,
}

/// Which part of a recovery scan is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFlags {
    /// Open a scan
    Start,
    /// Close a scan
    End,
    /// Open and close in one call, returning everything
    Full,
}

/// Outcome of a successful prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    /// Branch is durably prepared and must be committed or rolled back
    Ok,
    /// Branch did no durable work; nothing left to commit
    ReadOnly,
}

/// One resource manager's handle, as seen by the coordinator.
pub trait ResourceParticipant: Send + Sync {
    /// Display name of the resource manager, used in log records.
    fn resource_manager_name(&self) -> &str;

    /// Whether this participant may join an existing branch.
    fn supports_join(&self) -> bool {
        false
    }

    /// Whether this participant may suspend and resume its association.
    fn supports_suspend(&self) -> bool {
        false
    }

    /// Associate the handle with a branch.
    fn start(&self, branch: &BranchId, flags: StartFlags) -> Result<(), XaError>;

    /// Dissociate the handle from a branch.
    fn end(&self, branch: &BranchId, flags: EndFlags) -> Result<(), XaError>;

    /// First phase: ask the branch to vote.
    fn prepare(&self, branch: &BranchId) -> Result<PrepareVote, XaError>;

    /// Second phase: commit the branch.
    fn commit(&self, branch: &BranchId, one_phase: bool) -> Result<(), XaError>;

    /// Roll the branch back.
    fn rollback(&self, branch: &BranchId) -> Result<(), XaError>;

    /// Forward a timeout in seconds (0 restores the participant's default).
    fn set_timeout(&self, seconds: u32) -> Result<(), XaError>;

    /// Whether `other` talks to the same resource manager.
    fn is_same_resource_manager(&self, other: &dyn ResourceParticipant) -> Result<bool, XaError>;

    /// List branches the resource manager holds prepared or heuristically completed.
    fn recover(&self, flags: ScanFlags) -> Result<Vec<ExternalXid>, XaError>;
}

/// Error type returned by [`Synchronization::before_completion`].
pub type SyncError = Box<dyn std::error::Error + Send + Sync>;

/// Application observer of transaction completion.
pub trait Synchronization: Send + Sync {
    /// Called once before the prepare phase. An error forces rollback.
    fn before_completion(&self) -> Result<(), SyncError>;

    /// Called once after the terminal state is reached.
    fn after_completion(&self, status: TransactionStatus);
}
