//! Core types for the twopc coordinator
//!
//! This crate defines the vocabulary shared by every layer:
//! - [`GlobalId`] / [`BranchId`]: transaction identifiers and their encoding
//! - [`filter_recovery`]: recognising this coordinator's ids in a recovery scan
//! - [`Error`] / [`XaError`]: the coordinator and participant error types
//! - [`ResourceParticipant`] / [`Synchronization`]: contracts implemented outside the coordinator
//! - [`TransactionStatus`]: the caller-visible state machine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod participant;
pub mod status;

pub use error::{xa_codes, Error, IdError, Result, XaError};
pub use ids::{
    filter_recovery, truncate_coordinator_id, BranchId, ExternalXid, GlobalId, FORMAT_ID,
    GLOBAL_ID_LEN, MAX_COORDINATOR_ID_LEN,
};
pub use participant::{
    EndFlags, PrepareVote, ResourceParticipant, ScanFlags, StartFlags, SyncError, Synchronization,
};
pub use status::TransactionStatus;
