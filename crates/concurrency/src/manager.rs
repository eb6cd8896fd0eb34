//! Transaction manager: the current transaction per execution context
//!
//! Provides begin / commit / rollback by orchestrating:
//! 1. Transaction-number allocation (store)
//! 2. Transaction construction (records `active(global)`)
//! 3. Current-transaction bookkeeping per [`ContextId`]
//! 4. Crash recovery against each resource participant at startup
//!
//! ## Context Lifecycle
//!
//! ```text
//! begin(ctx)     → slot[ctx].current = Some(tx)
//! commit(ctx)    → tx.commit() → ... → CompletionListener → slot[ctx].current = None
//! rollback(ctx)  → tx.rollback() → ... → CompletionListener → slot[ctx].current = None
//! ```
//!
//! Nested transactions are not supported: `begin` on a context that already
//! has a current transaction fails with `NotSupported`.

use crate::context::ContextId;
use crate::listener::CompletionListener;
use crate::recovery::{self, RecoveryReport};
use crate::transaction::Transaction;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use twopc_core::{Error, GlobalId, ResourceParticipant, Result, TransactionStatus};
use twopc_durability::TransactionStore;

/// Per-context state.
#[derive(Default)]
struct ContextSlot {
    /// Timeout applied to transactions begun in this context
    timeout_override: Option<u32>,
    current: Option<Arc<Transaction>>,
}

#[derive(Default)]
struct MetricCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    failed_completions: AtomicU64,
}

/// Transaction manager metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerMetrics {
    /// Transactions begun
    pub begun: u64,
    /// Transactions that reached Committed
    pub committed: u64,
    /// Transactions that reached RolledBack
    pub rolled_back: u64,
    /// Completions that reported a system error (inconsistent data or log)
    pub failed_completions: u64,
    /// Contexts that currently hold a transaction
    pub active: u64,
}

/// Clears a context's current-transaction slot when its transaction completes.
struct ReleaseContext {
    contexts: Weak<DashMap<ContextId, ContextSlot>>,
    metrics: Weak<MetricCounters>,
    ctx: ContextId,
}

impl CompletionListener for ReleaseContext {
    fn on_transaction_completed(&self, transaction: &Transaction) {
        if let Some(metrics) = self.metrics.upgrade() {
            match transaction.status() {
                TransactionStatus::Committed => metrics.committed.fetch_add(1, Ordering::Relaxed),
                _ => metrics.rolled_back.fetch_add(1, Ordering::Relaxed),
            };
        }

        let Some(contexts) = self.contexts.upgrade() else {
            return;
        };
        if let Some(mut slot) = contexts.get_mut(&self.ctx) {
            let is_current = slot
                .current
                .as_ref()
                .map(|tx| tx.global_id() == transaction.global_id())
                .unwrap_or(false);
            if is_current {
                slot.current = None;
            }
        }
        contexts.remove_if(&self.ctx, |_, slot| {
            slot.current.is_none() && slot.timeout_override.is_none()
        });
        debug!(ctx = %self.ctx, gtrid = %transaction.global_id(), "Released context");
    }
}

/// Manages the current transaction of each execution context.
///
/// # Thread Safety
///
/// Different contexts never contend beyond the registry's shard locks.
/// Operations on one transaction serialize on that transaction's lock.
pub struct TransactionManager {
    coordinator_id: String,
    store: Arc<dyn TransactionStore>,
    contexts: Arc<DashMap<ContextId, ContextSlot>>,
    metrics: Arc<MetricCounters>,
    default_timeout_secs: u32,
    one_phase_optimization: bool,
}

impl TransactionManager {
    /// Create a manager for `coordinator_id` logging to `store`.
    ///
    /// The identity must be unique among coordinators sharing a log or a
    /// resource manager; only its first 52 bytes are significant.
    pub fn new(coordinator_id: impl Into<String>, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            store,
            contexts: Arc::new(DashMap::new()),
            metrics: Arc::new(MetricCounters::default()),
            default_timeout_secs: 0,
            one_phase_optimization: true,
        }
    }

    /// Timeout applied to every new transaction without a context override.
    pub fn with_default_timeout(mut self, seconds: u32) -> Self {
        self.default_timeout_secs = seconds;
        self
    }

    /// Enable or disable the single-branch one-phase commit.
    pub fn with_one_phase_optimization(mut self, enabled: bool) -> Self {
        self.one_phase_optimization = enabled;
        self
    }

    /// Coordinator identity.
    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    /// Transaction store in use.
    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Begin a transaction in `ctx`.
    pub fn begin(&self, ctx: ContextId) -> Result<Arc<Transaction>> {
        let timeout = {
            let slot = self.contexts.get(&ctx);
            if slot.as_ref().map(|s| s.current.is_some()).unwrap_or(false) {
                return Err(Error::NotSupported(format!(
                    "nested transactions are not supported ({})",
                    ctx
                )));
            }
            slot.and_then(|s| s.timeout_override)
                .unwrap_or(self.default_timeout_secs)
        };

        let number = self
            .store
            .next_transaction_number()
            .map_err(|e| Error::system_with("could not allocate transaction number", e))?;
        let gid = GlobalId::new(&self.coordinator_id, number)
            .map_err(|e| Error::system_with("could not build global transaction id", e))?;

        let tx = Arc::new(Transaction::begin(
            gid,
            Arc::clone(&self.store),
            self.one_phase_optimization,
        )?);
        if timeout > 0 {
            tx.set_timeout(i64::from(timeout))?;
        }
        tx.register_completion_listener(Arc::new(ReleaseContext {
            contexts: Arc::downgrade(&self.contexts),
            metrics: Arc::downgrade(&self.metrics),
            ctx,
        }))?;

        self.contexts.entry(ctx).or_default().current = Some(Arc::clone(&tx));
        self.metrics.begun.fetch_add(1, Ordering::Relaxed);
        debug!(ctx = %ctx, gtrid = %tx.global_id(), "Began transaction");
        Ok(tx)
    }

    /// Current transaction of `ctx`, if any.
    pub fn current(&self, ctx: ContextId) -> Option<Arc<Transaction>> {
        self.contexts.get(&ctx).and_then(|slot| slot.current.clone())
    }

    /// Status of the current transaction, or `NoTransaction`.
    pub fn get_status(&self, ctx: ContextId) -> TransactionStatus {
        self.current(ctx)
            .map(|tx| tx.status())
            .unwrap_or(TransactionStatus::NoTransaction)
    }

    /// Commit the current transaction of `ctx`.
    pub fn commit(&self, ctx: ContextId) -> Result<()> {
        let tx = self.require_current(ctx)?;
        let result = tx.commit();
        self.note_failure(&result);
        result
    }

    /// Roll back the current transaction of `ctx`.
    pub fn rollback(&self, ctx: ContextId) -> Result<()> {
        let tx = self.require_current(ctx)?;
        let result = tx.rollback();
        self.note_failure(&result);
        result
    }

    /// Mark the current transaction of `ctx` rollback-only.
    pub fn set_rollback_only(&self, ctx: ContextId) -> Result<()> {
        self.require_current(ctx)?.set_rollback_only()
    }

    /// Set the timeout of the current transaction of `ctx`.
    ///
    /// The value is also remembered for later transactions in `ctx`;
    /// 0 clears that override.
    pub fn set_timeout(&self, ctx: ContextId, seconds: i64) -> Result<()> {
        if seconds < 0 {
            return Err(Error::system(format!("negative timeout {}", seconds)));
        }
        let tx = self.require_current(ctx)?;
        tx.set_timeout(seconds)?;

        if let Some(mut slot) = self.contexts.get_mut(&ctx) {
            slot.timeout_override = match seconds {
                0 => None,
                secs => u32::try_from(secs).ok(),
            };
        }
        Ok(())
    }

    /// Suspending a transaction across contexts is not supported.
    pub fn suspend(&self, _ctx: ContextId) -> Result<Arc<Transaction>> {
        Err(Error::UnsupportedOperation(
            "suspend is not supported".to_string(),
        ))
    }

    /// Resuming a transaction in another context is not supported.
    pub fn resume(&self, _ctx: ContextId, _tx: Arc<Transaction>) -> Result<()> {
        Err(Error::UnsupportedOperation("resume is not supported".to_string()))
    }

    /// Resolve in-doubt branches held by `participant`.
    ///
    /// Call once per participant at startup, before application code uses it.
    pub fn recover(&self, participant: &dyn ResourceParticipant) -> Result<RecoveryReport> {
        recovery::recover(&self.coordinator_id, self.store.as_ref(), participant)
    }

    /// Snapshot of the manager's counters.
    pub fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics {
            begun: self.metrics.begun.load(Ordering::Relaxed),
            committed: self.metrics.committed.load(Ordering::Relaxed),
            rolled_back: self.metrics.rolled_back.load(Ordering::Relaxed),
            failed_completions: self.metrics.failed_completions.load(Ordering::Relaxed),
            active: self
                .contexts
                .iter()
                .filter(|slot| slot.current.is_some())
                .count() as u64,
        }
    }

    fn require_current(&self, ctx: ContextId) -> Result<Arc<Transaction>> {
        self.current(ctx).ok_or_else(|| {
            Error::IllegalState(format!("no transaction associated with {}", ctx))
        })
    }

    fn note_failure(&self, result: &Result<()>) {
        if matches!(result, Err(e) if e.is_system()) {
            self.metrics.failed_completions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
