//! Scripted participants and a journaling store for unit tests
//!
//! Participant calls and store writes land in one shared journal so tests can
//! assert on their interleaving.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use twopc_core::{
    BranchId, EndFlags, ExternalXid, GlobalId, PrepareVote, ResourceParticipant, ScanFlags,
    StartFlags, SyncError, Synchronization, TransactionStatus, XaError,
};
use twopc_durability::{InMemoryStore, LogStatus, StoreError, StoreResult, TransactionStore};

pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().clone()
}

pub(crate) fn clear(journal: &Journal) {
    journal.lock().clear();
}

/// In-memory store that journals every write and can be told to fail.
pub(crate) struct JournalStore {
    journal: Journal,
    inner: InMemoryStore,
    /// Last global status per tx number, never collected
    statuses: Mutex<HashMap<u64, LogStatus>>,
    failing_global: Mutex<Vec<LogStatus>>,
    failing_branch: Mutex<Vec<LogStatus>>,
    fail_decisions: AtomicBool,
    pub(crate) cleanups: AtomicUsize,
}

impl JournalStore {
    pub(crate) fn new(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: Arc::clone(journal),
            inner: InMemoryStore::new(),
            statuses: Mutex::new(HashMap::new()),
            failing_global: Mutex::new(Vec::new()),
            failing_branch: Mutex::new(Vec::new()),
            fail_decisions: AtomicBool::new(false),
            cleanups: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fail_global(&self, status: LogStatus) {
        self.failing_global.lock().push(status);
    }

    pub(crate) fn fail_branch(&self, status: LogStatus) {
        self.failing_branch.lock().push(status);
    }

    pub(crate) fn fail_decisions(&self) {
        self.fail_decisions.store(true, Ordering::SeqCst);
    }

    pub(crate) fn global_status(&self, gid: &GlobalId) -> Option<LogStatus> {
        self.statuses.lock().get(&gid.tx_number()).copied()
    }
}

impl TransactionStore for JournalStore {
    fn next_transaction_number(&self) -> StoreResult<u64> {
        self.inner.next_transaction_number()
    }

    fn is_committing(&self, branch: &BranchId) -> StoreResult<bool> {
        if self.fail_decisions.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted".to_string()));
        }
        self.inner.is_committing(branch)
    }

    fn record_global(
        &self,
        gid: &GlobalId,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        self.journal.lock().push(format!("store:{}", status));
        if self.failing_global.lock().contains(&status) {
            return Err(StoreError::Unavailable("scripted".to_string()));
        }
        self.statuses.lock().insert(gid.tx_number(), status);
        self.inner.record_global(gid, status, cause)
    }

    fn record_branch(
        &self,
        branch: &BranchId,
        resource_manager: &str,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        self.journal
            .lock()
            .push(format!("store:{}:{}", resource_manager, status));
        if self.failing_branch.lock().contains(&status) {
            return Err(StoreError::Unavailable("scripted".to_string()));
        }
        self.inner.record_branch(branch, resource_manager, status, cause)
    }

    fn cleanup(&self) -> StoreResult<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push("store:cleanup".to_string());
        self.inner.cleanup()
    }
}

/// Participant whose every answer is scripted up front.
pub(crate) struct ScriptedParticipant {
    rm: String,
    label: String,
    journal: Journal,
    joinable: bool,
    start_error: Option<XaError>,
    end_error: Option<XaError>,
    vote: Result<PrepareVote, XaError>,
    commit_error: Option<XaError>,
    rollback_error: Option<XaError>,
    timeout_error: Option<XaError>,
    pending: Vec<ExternalXid>,
    pub(crate) committed: Mutex<Vec<BranchId>>,
    pub(crate) rolled_back: Mutex<Vec<BranchId>>,
}

impl ScriptedParticipant {
    pub(crate) fn new(rm: &str, journal: &Journal) -> Self {
        Self {
            rm: rm.to_string(),
            label: rm.to_string(),
            journal: Arc::clone(journal),
            joinable: false,
            start_error: None,
            end_error: None,
            vote: Ok(PrepareVote::Ok),
            commit_error: None,
            rollback_error: None,
            timeout_error: None,
            pending: Vec::new(),
            committed: Mutex::new(Vec::new()),
            rolled_back: Mutex::new(Vec::new()),
        }
    }

    /// Name used in the journal (defaults to the resource manager name).
    pub(crate) fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub(crate) fn joinable(mut self) -> Self {
        self.joinable = true;
        self
    }

    pub(crate) fn fail_start(mut self, error: XaError) -> Self {
        self.start_error = Some(error);
        self
    }

    pub(crate) fn fail_end(mut self, error: XaError) -> Self {
        self.end_error = Some(error);
        self
    }

    pub(crate) fn vote(mut self, vote: Result<PrepareVote, XaError>) -> Self {
        self.vote = vote;
        self
    }

    pub(crate) fn fail_commit(mut self, error: XaError) -> Self {
        self.commit_error = Some(error);
        self
    }

    pub(crate) fn fail_rollback(mut self, error: XaError) -> Self {
        self.rollback_error = Some(error);
        self
    }

    pub(crate) fn fail_timeout(mut self, error: XaError) -> Self {
        self.timeout_error = Some(error);
        self
    }

    pub(crate) fn pending(mut self, ids: Vec<ExternalXid>) -> Self {
        self.pending = ids;
        self
    }

    pub(crate) fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn note(&self, call: String) {
        self.journal.lock().push(format!("{}:{}", self.label, call));
    }

    fn scripted(error: &Option<XaError>) -> Result<(), XaError> {
        match error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl ResourceParticipant for ScriptedParticipant {
    fn resource_manager_name(&self) -> &str {
        &self.rm
    }

    fn supports_join(&self) -> bool {
        self.joinable
    }

    fn start(&self, branch: &BranchId, flags: StartFlags) -> Result<(), XaError> {
        self.note(format!("start({:?},{})", flags, branch.branch_seq()));
        Self::scripted(&self.start_error)
    }

    fn end(&self, _branch: &BranchId, flags: EndFlags) -> Result<(), XaError> {
        self.note(format!("end({:?})", flags));
        Self::scripted(&self.end_error)
    }

    fn prepare(&self, _branch: &BranchId) -> Result<PrepareVote, XaError> {
        self.note("prepare".to_string());
        self.vote.clone()
    }

    fn commit(&self, branch: &BranchId, one_phase: bool) -> Result<(), XaError> {
        let kind = if one_phase { "one_phase" } else { "two_phase" };
        self.note(format!("commit({})", kind));
        Self::scripted(&self.commit_error)?;
        self.committed.lock().push(branch.clone());
        Ok(())
    }

    fn rollback(&self, branch: &BranchId) -> Result<(), XaError> {
        self.note("rollback".to_string());
        Self::scripted(&self.rollback_error)?;
        self.rolled_back.lock().push(branch.clone());
        Ok(())
    }

    fn set_timeout(&self, seconds: u32) -> Result<(), XaError> {
        self.note(format!("timeout({})", seconds));
        Self::scripted(&self.timeout_error)
    }

    fn is_same_resource_manager(&self, other: &dyn ResourceParticipant) -> Result<bool, XaError> {
        Ok(other.resource_manager_name() == self.rm)
    }

    fn recover(&self, _flags: ScanFlags) -> Result<Vec<ExternalXid>, XaError> {
        self.note("recover".to_string());
        Ok(self.pending.clone())
    }
}

/// Synchronization that journals its callbacks.
pub(crate) struct RecordingSync {
    journal: Journal,
    fail_before: bool,
}

impl RecordingSync {
    pub(crate) fn new(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: Arc::clone(journal),
            fail_before: false,
        })
    }

    pub(crate) fn failing(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: Arc::clone(journal),
            fail_before: true,
        })
    }
}

impl Synchronization for RecordingSync {
    fn before_completion(&self) -> Result<(), SyncError> {
        self.journal.lock().push("sync:before".to_string());
        if self.fail_before {
            return Err("scripted before_completion failure".into());
        }
        Ok(())
    }

    fn after_completion(&self, status: TransactionStatus) {
        self.journal.lock().push(format!("sync:after({})", status));
    }
}

/// Expected journal lines for one branch's happy prepare.
pub(crate) fn prepared_lines(rm: &str) -> Vec<String> {
    vec![
        format!("store:{}:preparing", rm),
        format!("{}:end(Success)", rm),
        format!("{}:prepare", rm),
        format!("store:{}:prepared", rm),
    ]
}

/// Expected journal lines for one branch's happy two-phase commit.
pub(crate) fn committed_lines(rm: &str) -> Vec<String> {
    vec![
        format!("store:{}:committing", rm),
        format!("{}:commit(two_phase)", rm),
        format!("store:{}:committed", rm),
    ]
}
