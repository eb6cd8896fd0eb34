//! Durability mode for log writes.
//!
//! Defines when the file store fsyncs.

use crate::store::LogStatus;
use serde::{Deserialize, Serialize};

/// Durability mode for log writes.
///
/// | Mode | fsync | Use Case |
/// |------|-------|----------|
/// | None | never | Tests, throwaway coordinators |
/// | Critical | recovery-critical records only | Production (balanced) |
/// | Strict | every record | Audit-grade diagnostics |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// No fsync - records may be lost on crash.
    ///
    /// Recovery is not guaranteed to see the commit decision.
    None,

    /// fsync transaction numbers and Committing / Committed / RolledBack.
    ///
    /// Diagnostic records ride along with the next critical fsync.
    Critical,

    /// fsync after every record.
    Strict,
}

impl DurabilityMode {
    /// Check if a record with `status` must be fsynced before returning.
    pub fn requires_sync(&self, status: LogStatus) -> bool {
        match self {
            DurabilityMode::None => false,
            DurabilityMode::Critical => status.is_recovery_critical(),
            DurabilityMode::Strict => true,
        }
    }

    /// Check if the transaction-number high-water mark must be fsynced.
    pub fn syncs_sequence(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }

    /// Human-readable description of the mode.
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::None => "No fsync (fastest, recovery not guaranteed)",
            DurabilityMode::Critical => "fsync recovery-critical records (balanced)",
            DurabilityMode::Strict => "fsync every record (safest, slowest)",
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Critical
    }
}
