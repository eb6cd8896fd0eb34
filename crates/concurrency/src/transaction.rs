//! The per-unit-of-work two-phase commit state machine
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. before_completion() on every Synchronization (lock released)
//! 2. record preparing(global)
//! 3. per branch: preparing(branch) → end(SUCCESS) → prepare → prepared(branch)
//!                read-only votes are closed and recorded committed(branch)
//! 4. record prepared(global)
//! 5. record committing(global)                      ← COMMIT DECISION
//! 6. per open branch: committing(branch) → commit(two-phase) → committed(branch)
//! 7. record committed(global) or commit_failed(global)
//! 8. after_completion(status), then CompletionListeners
//! ```
//!
//! Any failure before step 5 demotes the transaction to `MarkedRollback`
//! and the rollback procedure runs instead. Prepare failures stop the
//! prepare loop; commit and rollback failures never stop their loops.
//!
//! Participant and store calls are blocking. A participant that hangs
//! blocks the operation that called it; timeouts are only forwarded.

use crate::listener::CompletionListener;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use twopc_core::{
    BranchId, EndFlags, Error, GlobalId, PrepareVote, ResourceParticipant, Result, StartFlags,
    Synchronization, TransactionStatus, XaError,
};
use twopc_durability::{LogStatus, TransactionStore};

/// Opaque value cached on a transaction by an adapter.
pub type TransactionResource = Arc<dyn Any + Send + Sync>;

/// One participant's enlistment in a transaction.
struct Enlistment {
    participant: Arc<dyn ResourceParticipant>,
    /// Handles started with `Join` against this branch
    joined: Vec<Arc<dyn ResourceParticipant>>,
    branch: BranchId,
    /// Branch work has been ended
    ended: bool,
    /// Excluded from commit and rollback
    closed: bool,
}

impl Enlistment {
    fn resource_manager(&self) -> &str {
        self.participant.resource_manager_name()
    }

    fn handles(&self) -> impl Iterator<Item = &Arc<dyn ResourceParticipant>> {
        self.joined.iter().chain(std::iter::once(&self.participant))
    }

    fn end(&mut self, flags: EndFlags) -> std::result::Result<(), XaError> {
        for handle in &self.joined {
            handle.end(&self.branch, flags)?;
        }
        self.participant.end(&self.branch, flags)?;
        self.ended = true;
        Ok(())
    }
}

/// Per-branch result of a commit or rollback pass.
#[derive(Debug, Clone, Copy)]
struct BranchOutcome {
    participant_ok: bool,
    log_ok: bool,
}

impl BranchOutcome {
    fn new() -> Self {
        Self {
            participant_ok: true,
            log_ok: true,
        }
    }
}

/// Aggregate of a pass over every open branch.
#[derive(Debug, Clone, Copy)]
struct PassSummary {
    participants_ok: bool,
    log_ok: bool,
}

impl PassSummary {
    fn fold(outcomes: &[BranchOutcome], log_ok: bool) -> Self {
        Self {
            participants_ok: outcomes.iter().all(|o| o.participant_ok),
            log_ok: log_ok && outcomes.iter().all(|o| o.log_ok),
        }
    }
}

struct TxState {
    status: TransactionStatus,
    /// Set while commit or rollback is running, including before-completion
    completing: bool,
    timeout_secs: u32,
    enlistments: Vec<Enlistment>,
    synchronizations: Vec<Arc<dyn Synchronization>>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    resources: HashMap<String, TransactionResource>,
}

/// A global unit of work coordinated with two-phase commit.
///
/// All state-mutating operations serialize on one internal lock. Callbacks
/// run with the lock released.
pub struct Transaction {
    gid: GlobalId,
    store: Arc<dyn TransactionStore>,
    one_phase_optimization: bool,
    state: Mutex<TxState>,
}

impl Transaction {
    /// Start a transaction for `gid`.
    ///
    /// Records `active(global)` before returning. If that write fails no
    /// transaction exists: an unrecorded global id could never be recovered.
    pub fn begin(
        gid: GlobalId,
        store: Arc<dyn TransactionStore>,
        one_phase_optimization: bool,
    ) -> Result<Self> {
        store
            .record_global(&gid, LogStatus::Active, None)
            .map_err(|e| Error::system_with(format!("could not record transaction {}", gid), e))?;

        debug!(gtrid = %gid, "Transaction started");

        Ok(Self {
            gid,
            store,
            one_phase_optimization,
            state: Mutex::new(TxState {
                status: TransactionStatus::Active,
                completing: false,
                timeout_secs: 0,
                enlistments: Vec::new(),
                synchronizations: Vec::new(),
                listeners: Vec::new(),
                resources: HashMap::new(),
            }),
        })
    }

    /// Global id of this transaction.
    pub fn global_id(&self) -> &GlobalId {
        &self.gid
    }

    /// Current status.
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Timeout forwarded to participants, in seconds (0 = participant default).
    pub fn timeout(&self) -> u32 {
        self.state.lock().timeout_secs
    }

    /// Number of branches created (joins do not count).
    pub fn branch_count(&self) -> usize {
        self.state.lock().enlistments.len()
    }

    /// Enlist a participant.
    ///
    /// A joinable participant on the same resource manager as an existing
    /// branch is started with `Join` against that branch. Otherwise a new
    /// branch is allocated, recorded, and started.
    pub fn enlist(&self, participant: Arc<dyn ResourceParticipant>) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(Error::IllegalState(format!(
                "cannot enlist in transaction {} with status {}",
                self.gid, state.status
            )));
        }
        let timeout = state.timeout_secs;

        if participant.supports_join() {
            for enlistment in state.enlistments.iter_mut().filter(|e| !e.closed) {
                match enlistment
                    .participant
                    .is_same_resource_manager(participant.as_ref())
                {
                    Ok(true) => {
                        if timeout > 0 {
                            participant.set_timeout(timeout).map_err(|e| {
                                Error::system_with("could not set participant timeout", e)
                            })?;
                        }
                        participant
                            .start(&enlistment.branch, StartFlags::Join)
                            .map_err(|e| {
                                Error::system_with(
                                    format!("could not join branch {}", enlistment.branch),
                                    e,
                                )
                            })?;
                        debug!(
                            branch = %enlistment.branch,
                            rm = participant.resource_manager_name(),
                            "Joined existing branch"
                        );
                        enlistment.joined.push(participant);
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        branch = %enlistment.branch,
                        error = %e,
                        "Same-resource-manager check failed, not joining"
                    ),
                }
            }
        }

        let branch = self.gid.create_branch();
        let rm = participant.resource_manager_name().to_string();
        state.enlistments.push(Enlistment {
            participant: Arc::clone(&participant),
            joined: Vec::new(),
            branch: branch.clone(),
            ended: false,
            closed: false,
        });

        // The global active record already makes this id recoverable
        self.log_branch(&branch, &rm, LogStatus::Active, None);

        let timed = match timeout {
            0 => Ok(()),
            secs => participant.set_timeout(secs),
        };
        let started = timed.and_then(|_| participant.start(&branch, StartFlags::NoFlags));

        if let Err(e) = started {
            if let Some(enlistment) = state.enlistments.last_mut() {
                enlistment.closed = true;
                enlistment.ended = true;
            }
            return Err(Error::system_with(
                format!("could not start branch {} on {}", branch, rm),
                e,
            ));
        }

        debug!(branch = %branch, rm = %rm, "Enlisted participant");
        Ok(())
    }

    /// Generic delist is not supported; branches end during completion.
    pub fn delist(&self, _participant: &dyn ResourceParticipant, _flags: EndFlags) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "delist is not supported; branches are ended at completion".to_string(),
        ))
    }

    /// Enlisting a raw handle that bypasses [`ResourceParticipant`] is not supported.
    pub fn enlist_unmanaged(&self, _handle: &dyn Any) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "only ResourceParticipant adapters can be enlisted".to_string(),
        ))
    }

    /// Register an application observer.
    pub fn register_synchronization(&self, sync: Arc<dyn Synchronization>) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            TransactionStatus::Active => {
                state.synchronizations.push(sync);
                Ok(())
            }
            TransactionStatus::MarkedRollback => Err(Error::Rollback(format!(
                "transaction {} is marked for rollback",
                self.gid
            ))),
            status => Err(Error::IllegalState(format!(
                "cannot register synchronization with status {}",
                status
            ))),
        }
    }

    /// Register a completion listener, invoked once after every other callback.
    pub fn register_completion_listener(&self, listener: Arc<dyn CompletionListener>) -> Result<()> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return Err(Error::IllegalState(format!(
                "transaction {} already completed",
                self.gid
            )));
        }
        state.listeners.push(listener);
        Ok(())
    }

    /// Cache an adapter value under `key`, returning the previous value.
    pub fn put_resource(
        &self,
        key: impl Into<String>,
        value: TransactionResource,
    ) -> Option<TransactionResource> {
        self.state.lock().resources.insert(key.into(), value)
    }

    /// Look up a cached adapter value.
    pub fn get_resource(&self, key: &str) -> Option<TransactionResource> {
        self.state.lock().resources.get(key).cloned()
    }

    /// Force the transaction to roll back at completion.
    pub fn set_rollback_only(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            TransactionStatus::Active | TransactionStatus::MarkedRollback => {
                state.status = TransactionStatus::MarkedRollback;
                debug!(gtrid = %self.gid, "Marked for rollback");
                Ok(())
            }
            status => Err(Error::IllegalState(format!(
                "cannot mark rollback-only with status {}",
                status
            ))),
        }
    }

    /// Set the participant timeout in seconds.
    ///
    /// Negative values are rejected. 0 restores the participants' default.
    /// The value is forwarded to every enlisted participant now and to every
    /// participant enlisted later.
    pub fn set_timeout(&self, seconds: i64) -> Result<()> {
        if seconds < 0 {
            return Err(Error::system(format!("negative timeout {}", seconds)));
        }
        let seconds = u32::try_from(seconds)
            .map_err(|_| Error::system(format!("timeout {} out of range", seconds)))?;

        let mut state = self.state.lock();
        for enlistment in state.enlistments.iter().filter(|e| !e.closed) {
            for handle in enlistment.handles() {
                handle.set_timeout(seconds).map_err(|e| {
                    Error::system_with(
                        format!("could not set timeout on {}", enlistment.branch),
                        e,
                    )
                })?;
            }
        }
        state.timeout_secs = seconds;
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// Returns `Rollback` if the transaction was rolled back instead, and
    /// `System` if it committed but a participant or log write failed.
    pub fn commit(&self) -> Result<()> {
        let synchronizations = {
            let mut state = self.state.lock();
            if state.completing {
                return Err(Error::IllegalState(format!(
                    "transaction {} is already completing",
                    self.gid
                )));
            }
            match state.status {
                TransactionStatus::Active => {}
                TransactionStatus::MarkedRollback => {
                    return Err(Error::Rollback(format!(
                        "transaction {} is marked for rollback",
                        self.gid
                    )))
                }
                status => {
                    return Err(Error::IllegalState(format!(
                        "cannot commit with status {}",
                        status
                    )))
                }
            }
            state.completing = true;
            state.synchronizations.clone()
        };

        let mut sync_failed = false;
        for sync in &synchronizations {
            let outcome = catch_unwind(AssertUnwindSafe(|| sync.before_completion()));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(gtrid = %self.gid, error = %e, "before_completion failed, rolling back");
                    sync_failed = true;
                }
                Err(_) => {
                    warn!(gtrid = %self.gid, "before_completion panicked, rolling back");
                    sync_failed = true;
                }
            }
        }

        let mut state = self.state.lock();
        if sync_failed && state.status == TransactionStatus::Active {
            state.status = TransactionStatus::MarkedRollback;
        }
        let result = self.run_commit(&mut state);
        self.finish(state);
        result
    }

    /// Roll the transaction back.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.completing {
            return Err(Error::IllegalState(format!(
                "transaction {} is already completing",
                self.gid
            )));
        }
        match state.status {
            TransactionStatus::Active | TransactionStatus::MarkedRollback => {}
            status => {
                return Err(Error::IllegalState(format!(
                    "cannot roll back with status {}",
                    status
                )))
            }
        }
        state.completing = true;

        let summary = self.rollback_branches(&mut state);
        let result = if !summary.participants_ok {
            Err(Error::system(format!(
                "transaction {} rolled back but data may be inconsistent",
                self.gid
            )))
        } else if !summary.log_ok {
            Err(Error::system(format!(
                "transaction {} rolled back but the log is incomplete",
                self.gid
            )))
        } else {
            Ok(())
        };
        self.finish(state);
        result
    }

    fn run_commit(&self, state: &mut TxState) -> Result<()> {
        let open = state.enlistments.iter().filter(|e| !e.closed).count();
        if self.one_phase_optimization && open == 1 && state.status == TransactionStatus::Active {
            return self.commit_one_phase(state);
        }

        if state.status == TransactionStatus::Active {
            state.status = if self.log_global(LogStatus::Preparing, None) {
                TransactionStatus::Preparing
            } else {
                TransactionStatus::MarkedRollback
            };
        }

        let mut log_ok = true;
        if state.status == TransactionStatus::Preparing {
            self.prepare_branches(state, &mut log_ok);
        }

        if state.status == TransactionStatus::Prepared {
            if self.log_global(LogStatus::Committing, None) {
                state.status = TransactionStatus::Committing;
                return self.commit_branches(state, log_ok);
            }
            state.status = TransactionStatus::MarkedRollback;
        }

        self.rollback_branches(state);
        Err(Error::Rollback(format!(
            "transaction {} was rolled back",
            self.gid
        )))
    }

    fn prepare_branches(&self, state: &mut TxState, log_ok: &mut bool) {
        let mut failed = false;

        for enlistment in state.enlistments.iter_mut().filter(|e| !e.closed) {
            *log_ok &= self.log_enlistment(enlistment, LogStatus::Preparing, None);

            let vote = enlistment
                .end(EndFlags::Success)
                .and_then(|_| enlistment.participant.prepare(&enlistment.branch));

            match vote {
                Ok(PrepareVote::Ok) => {
                    *log_ok &= self.log_enlistment(enlistment, LogStatus::Prepared, None);
                }
                Ok(PrepareVote::ReadOnly) => {
                    enlistment.closed = true;
                    *log_ok &= self.log_enlistment(enlistment, LogStatus::Committed, None);
                }
                Err(e) => {
                    warn!(
                        branch = %enlistment.branch,
                        rm = enlistment.resource_manager(),
                        error = %e,
                        "Prepare failed, aborting"
                    );
                    if e.is_rollback() {
                        enlistment.closed = true;
                    }
                    failed = true;
                    break;
                }
            }
        }

        state.status = if !failed && self.log_global(LogStatus::Prepared, None) {
            TransactionStatus::Prepared
        } else {
            TransactionStatus::MarkedRollback
        };
    }

    fn commit_branches(&self, state: &mut TxState, log_ok: bool) -> Result<()> {
        let outcomes: Vec<BranchOutcome> = state
            .enlistments
            .iter()
            .filter(|e| !e.closed)
            .map(|enlistment| {
                let mut outcome = BranchOutcome::new();
                outcome.log_ok &= self.log_enlistment(enlistment, LogStatus::Committing, None);
                match enlistment.participant.commit(&enlistment.branch, false) {
                    Ok(()) => {
                        outcome.log_ok &=
                            self.log_enlistment(enlistment, LogStatus::Committed, None);
                    }
                    Err(e) => {
                        error!(
                            branch = %enlistment.branch,
                            rm = enlistment.resource_manager(),
                            error = %e,
                            "Commit failed after commit decision"
                        );
                        outcome.participant_ok = false;
                        outcome.log_ok &= self.log_enlistment(
                            enlistment,
                            LogStatus::CommitFailed,
                            Some(&e.to_string()),
                        );
                    }
                }
                outcome
            })
            .collect();

        let mut summary = PassSummary::fold(&outcomes, log_ok);
        summary.log_ok &= if summary.participants_ok {
            self.log_global(LogStatus::Committed, None)
        } else {
            self.log_global(LogStatus::CommitFailed, Some("participant commit failed"))
        };
        state.status = TransactionStatus::Committed;

        if !summary.participants_ok {
            Err(Error::system(format!(
                "transaction {} committed but data may be inconsistent",
                self.gid
            )))
        } else if !summary.log_ok {
            Err(Error::system(format!(
                "transaction {} committed but the log is incomplete",
                self.gid
            )))
        } else {
            Ok(())
        }
    }

    /// Single open branch: skip the prepare round and commit in one phase.
    fn commit_one_phase(&self, state: &mut TxState) -> Result<()> {
        let Some(index) = state.enlistments.iter().position(|e| !e.closed) else {
            return Err(Error::system("one-phase commit without an open branch"));
        };

        if let Err(e) = state.enlistments[index].end(EndFlags::Success) {
            warn!(branch = %state.enlistments[index].branch, error = %e, "End failed, aborting");
            state.status = TransactionStatus::MarkedRollback;
        } else if !self.log_global(LogStatus::Committing, None) {
            state.status = TransactionStatus::MarkedRollback;
        }

        if state.status == TransactionStatus::MarkedRollback {
            self.rollback_branches(state);
            return Err(Error::Rollback(format!(
                "transaction {} was rolled back",
                self.gid
            )));
        }

        state.status = TransactionStatus::Committing;
        let enlistment = &mut state.enlistments[index];
        let mut log_ok = self.log_enlistment(enlistment, LogStatus::Committing, None);

        match enlistment.participant.commit(&enlistment.branch, true) {
            Ok(()) => {
                log_ok &= self.log_enlistment(enlistment, LogStatus::Committed, None);
                log_ok &= self.log_global(LogStatus::Committed, None);
                state.status = TransactionStatus::Committed;
                if log_ok {
                    Ok(())
                } else {
                    Err(Error::system(format!(
                        "transaction {} committed but the log is incomplete",
                        self.gid
                    )))
                }
            }
            Err(e) if e.is_rollback() => {
                warn!(branch = %enlistment.branch, error = %e, "One-phase commit rolled back");
                enlistment.closed = true;
                self.log_enlistment(enlistment, LogStatus::RolledBack, Some(&e.to_string()));
                self.log_global(LogStatus::RolledBack, None);
                state.status = TransactionStatus::RolledBack;
                Err(Error::Rollback(format!(
                    "transaction {} was rolled back by its participant: {}",
                    self.gid, e
                )))
            }
            Err(e) => {
                error!(branch = %enlistment.branch, error = %e, "One-phase commit failed");
                self.log_enlistment(enlistment, LogStatus::CommitFailed, Some(&e.to_string()));
                self.log_global(LogStatus::CommitFailed, Some("participant commit failed"));
                state.status = TransactionStatus::Committed;
                Err(Error::system(format!(
                    "transaction {} committed but data may be inconsistent",
                    self.gid
                )))
            }
        }
    }

    fn rollback_branches(&self, state: &mut TxState) -> PassSummary {
        state.status = TransactionStatus::RollingBack;
        let log_ok = self.log_global(LogStatus::RollingBack, None);

        let outcomes: Vec<BranchOutcome> = state
            .enlistments
            .iter_mut()
            .filter(|e| !e.closed)
            .map(|enlistment| {
                let mut outcome = BranchOutcome::new();
                outcome.log_ok &= self.log_enlistment(enlistment, LogStatus::RollingBack, None);

                if !enlistment.ended {
                    if let Err(e) = enlistment.end(EndFlags::Fail) {
                        debug!(branch = %enlistment.branch, error = %e, "End before rollback failed");
                    }
                }

                match enlistment.participant.rollback(&enlistment.branch) {
                    Ok(()) => {
                        outcome.log_ok &=
                            self.log_enlistment(enlistment, LogStatus::RolledBack, None);
                    }
                    Err(e) => {
                        error!(
                            branch = %enlistment.branch,
                            rm = enlistment.resource_manager(),
                            error = %e,
                            "Rollback failed"
                        );
                        outcome.participant_ok = false;
                        outcome.log_ok &= self.log_enlistment(
                            enlistment,
                            LogStatus::RollbackFailed,
                            Some(&e.to_string()),
                        );
                    }
                }
                outcome
            })
            .collect();

        let mut summary = PassSummary::fold(&outcomes, log_ok);
        summary.log_ok &= if summary.participants_ok {
            self.log_global(LogStatus::RolledBack, None)
        } else {
            self.log_global(LogStatus::RollbackFailed, Some("participant rollback failed"))
        };
        state.status = TransactionStatus::RolledBack;
        summary
    }

    /// Release the lock, then run after-completion and completion listeners.
    fn finish(&self, mut state: parking_lot::MutexGuard<'_, TxState>) {
        state.completing = false;
        let status = state.status;
        let synchronizations = state.synchronizations.clone();
        let listeners = state.listeners.clone();
        drop(state);

        debug!(gtrid = %self.gid, status = %status, "Transaction completed");

        for sync in &synchronizations {
            if catch_unwind(AssertUnwindSafe(|| sync.after_completion(status))).is_err() {
                warn!(gtrid = %self.gid, "after_completion panicked");
            }
        }
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_transaction_completed(self))).is_err() {
                warn!(gtrid = %self.gid, "completion listener panicked");
            }
        }
    }

    fn log_global(&self, status: LogStatus, cause: Option<&str>) -> bool {
        match self.store.record_global(&self.gid, status, cause) {
            Ok(()) => true,
            Err(e) => {
                warn!(gtrid = %self.gid, status = %status, error = %e, "Transaction log write failed");
                false
            }
        }
    }

    fn log_branch(&self, branch: &BranchId, rm: &str, status: LogStatus, cause: Option<&str>) -> bool {
        match self.store.record_branch(branch, rm, status, cause) {
            Ok(()) => true,
            Err(e) => {
                warn!(branch = %branch, rm, status = %status, error = %e, "Branch log write failed");
                false
            }
        }
    }

    fn log_enlistment(&self, enlistment: &Enlistment, status: LogStatus, cause: Option<&str>) -> bool {
        self.log_branch(&enlistment.branch, enlistment.resource_manager(), status, cause)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("gid", &self.gid)
            .field("status", &state.status)
            .field("branches", &state.enlistments.len())
            .field("timeout_secs", &state.timeout_secs)
            .finish()
    }
}
