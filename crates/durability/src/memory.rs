//! In-memory transaction store
//!
//! Satisfies the store contract without persistence. Useful for tests and
//! for coordinators whose participants can tolerate presumed abort after a
//! crash: nothing survives a restart, so recovery rolls every branch back.
//!
//! A global id is forgotten as soon as it reaches a collectable status. A
//! missing id answers `is_committing == false`, which is also the answer
//! for `RolledBack`, and a `Committed` id has no in-doubt branches left.

use crate::store::{LogRecord, LogStatus, StoreResult, TransactionStore};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use twopc_core::{BranchId, GlobalId};

/// Default number of records kept in the diagnostic history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Non-durable transaction store.
pub struct InMemoryStore {
    next_number: AtomicU64,
    /// Last global-level status per (coordinator, tx number)
    globals: Mutex<HashMap<(String, u64), LogStatus>>,
    history: Mutex<VecDeque<LogRecord>>,
    history_capacity: usize,
}

impl InMemoryStore {
    /// Create a store whose first transaction number is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a store whose first transaction number is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_number: AtomicU64::new(first),
            globals: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    /// Bound the diagnostic history (0 disables it).
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Last global-level status recorded for `gid`.
    ///
    /// `None` once the id reached `Committed` or `RolledBack`.
    pub fn global_status(&self, gid: &GlobalId) -> Option<LogStatus> {
        self.globals
            .lock()
            .get(&(gid.coordinator_id().to_string(), gid.tx_number()))
            .copied()
    }

    /// Snapshot of the diagnostic history, oldest first.
    pub fn history(&self) -> Vec<LogRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of global ids still tracked.
    pub fn tracked(&self) -> usize {
        self.globals.lock().len()
    }

    fn remember(&self, record: LogRecord) {
        if self.history_capacity == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(record);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore for InMemoryStore {
    fn next_transaction_number(&self) -> StoreResult<u64> {
        Ok(self.next_number.fetch_add(1, Ordering::SeqCst))
    }

    fn is_committing(&self, branch: &BranchId) -> StoreResult<bool> {
        Ok(self
            .global_status(branch.global())
            .map(|status| status.is_commit_decision())
            .unwrap_or(false))
    }

    fn record_global(
        &self,
        gid: &GlobalId,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        let key = (gid.coordinator_id().to_string(), gid.tx_number());
        {
            let mut globals = self.globals.lock();
            if status.is_collectable() {
                globals.remove(&key);
            } else {
                globals.insert(key, status);
            }
        }
        self.remember(LogRecord::global(gid, status, cause));
        Ok(())
    }

    fn record_branch(
        &self,
        branch: &BranchId,
        resource_manager: &str,
        status: LogStatus,
        cause: Option<&str>,
    ) -> StoreResult<()> {
        self.remember(LogRecord::branch(branch, resource_manager, status, cause));
        Ok(())
    }

    fn cleanup(&self) -> StoreResult<()> {
        self.globals.lock().retain(|_, status| !status.is_collectable());
        Ok(())
    }
}
