//! Error taxonomy for the coordinator
//!
//! Callers of the coordinator only ever see [`Error`]. Participants report
//! failures as [`XaError`], which carries an XA-style integer code so the
//! coordinator can tell "the resource already rolled back" apart from other
//! failures.

use thiserror::Error;

/// Coordinator error.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinator-internal failure or participant protocol violation
    #[error("system error: {message}")]
    System {
        /// What went wrong
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Commit failed and the transaction was rolled back
    #[error("transaction rolled back: {0}")]
    Rollback(String),

    /// Operation invoked outside its valid state transition
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Deliberately unimplemented surface
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Feature not supported in this context (nested transactions)
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// System error without a source.
    pub fn system(message: impl Into<String>) -> Self {
        Error::System {
            message: message.into(),
            source: None,
        }
    }

    /// System error wrapping an underlying cause.
    pub fn system_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::System {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this is a system error.
    pub fn is_system(&self) -> bool {
        matches!(self, Error::System { .. })
    }

    /// Check if the transaction was rolled back.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Error::Rollback(_))
    }

    /// Check if this is an illegal-state error.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    /// Check if this is an unsupported-operation error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedOperation(_))
    }

    /// Check if this is a not-supported error.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }
}

/// Identifier construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Coordinator identity is empty
    #[error("coordinator id must not be empty")]
    EmptyCoordinatorId,
}

/// XA-style error codes reported by participants.
pub mod xa_codes {
    /// Lower bound of the rollback range
    pub const XA_RBBASE: i32 = 100;
    /// Rolled back for an unspecified reason
    pub const XA_RBROLLBACK: i32 = XA_RBBASE;
    /// Communication failure
    pub const XA_RBCOMMFAIL: i32 = XA_RBBASE + 1;
    /// Deadlock detected
    pub const XA_RBDEADLOCK: i32 = XA_RBBASE + 2;
    /// Integrity violation
    pub const XA_RBINTEGRITY: i32 = XA_RBBASE + 3;
    /// Other rollback reason
    pub const XA_RBOTHER: i32 = XA_RBBASE + 4;
    /// Protocol error in the resource manager
    pub const XA_RBPROTO: i32 = XA_RBBASE + 5;
    /// Branch took too long
    pub const XA_RBTIMEOUT: i32 = XA_RBBASE + 6;
    /// May retry the branch
    pub const XA_RBTRANSIENT: i32 = XA_RBBASE + 7;
    /// Upper bound of the rollback range
    pub const XA_RBEND: i32 = XA_RBTRANSIENT;

    /// Heuristically committed and rolled back
    pub const XA_HEURMIX: i32 = 5;
    /// Heuristically rolled back
    pub const XA_HEURRB: i32 = 6;
    /// Heuristically committed
    pub const XA_HEURCOM: i32 = 7;

    /// Resource manager error
    pub const XAER_RMERR: i32 = -3;
    /// Unknown branch
    pub const XAER_NOTA: i32 = -4;
    /// Invalid arguments
    pub const XAER_INVAL: i32 = -5;
    /// Called in an improper context
    pub const XAER_PROTO: i32 = -6;
    /// Resource manager unavailable
    pub const XAER_RMFAIL: i32 = -7;
}

/// Failure reported by a resource participant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("XA error {code}: {message}")]
pub struct XaError {
    /// XA-style error code (see [`xa_codes`])
    pub code: i32,
    /// Human-readable detail
    pub message: String,
}

impl XaError {
    /// Create a participant error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Participant already rolled its branch back.
    pub fn rolled_back(message: impl Into<String>) -> Self {
        Self::new(xa_codes::XA_RBROLLBACK, message)
    }

    /// Resource manager failure.
    pub fn rm_error(message: impl Into<String>) -> Self {
        Self::new(xa_codes::XAER_RMERR, message)
    }

    /// Check if the code is in the rollback range.
    pub fn is_rollback(&self) -> bool {
        (xa_codes::XA_RBBASE..=xa_codes::XA_RBEND).contains(&self.code)
    }
}
