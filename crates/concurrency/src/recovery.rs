//! Crash recovery against one resource participant
//!
//! ## Recovery Sequence
//!
//! 1. Ask the participant for every branch it holds pending completion
//! 2. Keep only branches created by this coordinator
//! 3. Per branch: if the store saw the commit decision, commit; else roll back
//! 4. Record the outcome per branch
//! 5. Run store cleanup
//!
//! Decisions are derived only from the durable store and the participant's
//! own report, so recovery can be re-run safely after another crash.
//!
//! A store failure while deciding one branch skips that branch. A store
//! failure while recording a chosen outcome aborts the whole scan: losing
//! that record would break durability, not just diagnostics.

use std::time::Instant;
use tracing::{error, info, warn};
use twopc_core::{filter_recovery, BranchId, Error, ResourceParticipant, Result, ScanFlags};
use twopc_durability::{LogStatus, TransactionStore};

/// Outcome of one recovery scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Resource manager that was scanned
    pub resource_manager: String,
    /// Ids reported by the participant
    pub scanned: usize,
    /// Ids belonging to other coordinators (or duplicates)
    pub ignored: usize,
    /// Branches committed
    pub committed: usize,
    /// Branches rolled back
    pub rolled_back: usize,
    /// Branches whose commit failed
    pub commit_failures: usize,
    /// Branches whose rollback failed
    pub rollback_failures: usize,
    /// Branches skipped because the store could not decide
    pub skipped: usize,
    /// Total recovery time (microseconds)
    pub recovery_time_micros: u64,
}

impl RecoveryReport {
    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Recovery of {} complete: {} scanned, {} ignored, {} committed, {} rolled back, {} failed, {} skipped, {:.2}ms",
            self.resource_manager,
            self.scanned,
            self.ignored,
            self.committed,
            self.rolled_back,
            self.commit_failures + self.rollback_failures,
            self.skipped,
            self.recovery_time_micros as f64 / 1000.0,
        )
    }

    /// Check if any branch could not be resolved cleanly.
    pub fn has_issues(&self) -> bool {
        self.commit_failures > 0 || self.rollback_failures > 0 || self.skipped > 0
    }

    /// Branches of this coordinator that were processed.
    pub fn resolved(&self) -> usize {
        self.committed + self.rolled_back + self.commit_failures + self.rollback_failures
    }
}

/// Resolve every in-doubt branch `participant` holds for `coordinator_id`.
pub fn recover(
    coordinator_id: &str,
    store: &dyn TransactionStore,
    participant: &dyn ResourceParticipant,
) -> Result<RecoveryReport> {
    let start = Instant::now();
    let mut report = RecoveryReport {
        resource_manager: participant.resource_manager_name().to_string(),
        ..Default::default()
    };

    info!(
        rm = %report.resource_manager,
        coordinator = coordinator_id,
        "Starting recovery scan"
    );

    let scanned = scan(coordinator_id, store, participant, &mut report);

    if let Err(e) = store.cleanup() {
        warn!(error = %e, "Transaction store cleanup failed");
    }

    report.recovery_time_micros = start.elapsed().as_micros() as u64;
    scanned?;
    info!("{}", report.summary());
    Ok(report)
}

fn scan(
    coordinator_id: &str,
    store: &dyn TransactionStore,
    participant: &dyn ResourceParticipant,
    report: &mut RecoveryReport,
) -> Result<()> {
    let observed = participant.recover(ScanFlags::Full).map_err(|e| {
        Error::system_with(
            format!("recovery scan of {} failed", report.resource_manager),
            e,
        )
    })?;
    let ours = filter_recovery(&observed, coordinator_id);
    report.scanned = observed.len();
    report.ignored = observed.len() - ours.len();

    for branch in ours {
        let committing = match store.is_committing(&branch) {
            Ok(committing) => committing,
            Err(e) => {
                warn!(branch = %branch, error = %e, "Cannot decide branch outcome, skipping");
                report.skipped += 1;
                continue;
            }
        };

        if committing {
            recover_commit(store, participant, &branch, report)?;
        } else {
            recover_rollback(store, participant, &branch, report)?;
        }
    }
    Ok(())
}

fn recover_commit(
    store: &dyn TransactionStore,
    participant: &dyn ResourceParticipant,
    branch: &BranchId,
    report: &mut RecoveryReport,
) -> Result<()> {
    let rm = participant.resource_manager_name();
    record(store, branch, rm, LogStatus::Committing, None)?;

    match participant.commit(branch, true) {
        Ok(()) => {
            record(store, branch, rm, LogStatus::Committed, None)?;
            report.committed += 1;
        }
        Err(e) => {
            error!(branch = %branch, rm, error = %e, "Recovery commit failed");
            if let Err(log_err) =
                store.record_branch(branch, rm, LogStatus::CommitFailed, Some(&e.to_string()))
            {
                warn!(branch = %branch, error = %log_err, "Could not record commit failure");
            }
            report.commit_failures += 1;
        }
    }
    Ok(())
}

fn recover_rollback(
    store: &dyn TransactionStore,
    participant: &dyn ResourceParticipant,
    branch: &BranchId,
    report: &mut RecoveryReport,
) -> Result<()> {
    let rm = participant.resource_manager_name();
    record(store, branch, rm, LogStatus::RollingBack, None)?;

    match participant.rollback(branch) {
        Ok(()) => {
            record(store, branch, rm, LogStatus::RolledBack, None)?;
            report.rolled_back += 1;
        }
        Err(e) => {
            error!(branch = %branch, rm, error = %e, "Recovery rollback failed");
            if let Err(log_err) =
                store.record_branch(branch, rm, LogStatus::RollbackFailed, Some(&e.to_string()))
            {
                warn!(branch = %branch, error = %log_err, "Could not record rollback failure");
            }
            report.rollback_failures += 1;
        }
    }
    Ok(())
}

fn record(
    store: &dyn TransactionStore,
    branch: &BranchId,
    rm: &str,
    status: LogStatus,
    cause: Option<&str>,
) -> Result<()> {
    store.record_branch(branch, rm, status, cause).map_err(|e| {
        Error::system_with(
            format!("could not record {} for recovered branch {}", status, branch),
            e,
        )
    })
}
