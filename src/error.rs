//! Unified error type for the coordinator facade.
//!
//! Protocol errors from the transaction layer keep their classification so
//! callers can still tell a rollback from a system error.

use thiserror::Error;
use twopc_durability::StoreError;

/// All coordinator errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by a transaction or the transaction manager
    #[error(transparent)]
    Transaction(#[from] twopc_core::Error),

    /// Transaction store could not be opened or written
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if the transaction was rolled back instead of committed.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Error::Transaction(e) if e.is_rollback())
    }

    /// Check if this is a misuse of the transaction API.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::Transaction(e) if e.is_illegal_state())
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is a serious error.
    ///
    /// Serious errors mean data or the transaction log may be inconsistent
    /// and need operator attention.
    pub fn is_serious(&self) -> bool {
        match self {
            Error::Transaction(e) => e.is_system(),
            Error::Store(_) | Error::Io(_) => true,
            Error::Config(_) => false,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
