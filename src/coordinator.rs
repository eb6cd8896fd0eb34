//! Coordinator handle: a transaction manager wired to its transaction log.

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use twopc_concurrency::{
    ContextId, ManagerMetrics, RecoveryReport, Transaction, TransactionManager,
};
use twopc_core::{ResourceParticipant, TransactionStatus};
use twopc_durability::{DurabilityMode, FileStore, InMemoryStore, TransactionStore};

/// A two-phase commit coordinator.
///
/// Owns the [`TransactionManager`] and the transaction log it writes to.
/// Create one with [`Coordinator::open`], [`Coordinator::ephemeral`],
/// [`Coordinator::from_config`] or [`Coordinator::builder`].
///
/// # Example
///
/// ```ignore
/// use twopc::prelude::*;
///
/// let coordinator = Coordinator::open("orders-node-1", "./txlog")?;
/// coordinator.recover_all(&participants)?;
///
/// let ctx = ContextId::new();
/// let tx = coordinator.begin(ctx)?;
/// tx.enlist(orders_db.clone())?;
/// tx.enlist(billing_db.clone())?;
/// coordinator.commit(ctx)?;
/// ```
pub struct Coordinator {
    manager: TransactionManager,
    log_dir: Option<PathBuf>,
    durability: DurabilityMode,
}

impl Coordinator {
    /// Open a coordinator logging to `log_dir` with default settings.
    pub fn open(coordinator_id: impl Into<String>, log_dir: impl AsRef<Path>) -> Result<Self> {
        Self::builder()
            .coordinator_id(coordinator_id)
            .log_dir(log_dir)
            .open()
    }

    /// Create a coordinator whose log lives only in memory.
    ///
    /// Nothing survives a restart, so recovery rolls back every in-doubt
    /// branch. Use for tests.
    pub fn ephemeral(coordinator_id: impl Into<String>) -> Result<Self> {
        Self::builder().coordinator_id(coordinator_id).ephemeral()
    }

    /// Create a builder for coordinator configuration.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Create a coordinator from a TOML configuration file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(CoordinatorConfig::load(path)?)
    }

    /// Create a coordinator from a configuration.
    ///
    /// A `log_dir` selects the file-backed log; without one the log is kept
    /// in memory.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn TransactionStore> = match &config.log_dir {
            Some(dir) => Arc::new(FileStore::open(dir, config.durability)?),
            None => Arc::new(InMemoryStore::new()),
        };

        info!(
            coordinator = %config.coordinator_id,
            log_dir = ?config.log_dir,
            durability = config.durability.description(),
            "Coordinator opened"
        );

        let manager = TransactionManager::new(config.coordinator_id, store)
            .with_default_timeout(config.default_timeout_secs)
            .with_one_phase_optimization(config.one_phase_optimization);

        Ok(Self {
            manager,
            log_dir: config.log_dir,
            durability: config.durability,
        })
    }

    /// The underlying transaction manager.
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Coordinator identity.
    pub fn coordinator_id(&self) -> &str {
        self.manager.coordinator_id()
    }

    /// Transaction log directory, if file-backed.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Get the current durability mode.
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability
    }

    /// Check if the transaction log is kept only in memory.
    pub fn is_ephemeral(&self) -> bool {
        self.log_dir.is_none()
    }

    /// Begin a transaction in `ctx`.
    pub fn begin(&self, ctx: ContextId) -> Result<Arc<Transaction>> {
        Ok(self.manager.begin(ctx)?)
    }

    /// Commit the current transaction of `ctx`.
    pub fn commit(&self, ctx: ContextId) -> Result<()> {
        Ok(self.manager.commit(ctx)?)
    }

    /// Roll back the current transaction of `ctx`.
    pub fn rollback(&self, ctx: ContextId) -> Result<()> {
        Ok(self.manager.rollback(ctx)?)
    }

    /// Status of the current transaction of `ctx`.
    pub fn get_status(&self, ctx: ContextId) -> TransactionStatus {
        self.manager.get_status(ctx)
    }

    /// Resolve in-doubt branches on every participant, in order.
    ///
    /// Stops at the first participant whose scan fails; reports for the
    /// participants already processed are logged before the error returns.
    pub fn recover_all(
        &self,
        participants: &[Arc<dyn ResourceParticipant>],
    ) -> Result<Vec<RecoveryReport>> {
        let mut reports = Vec::with_capacity(participants.len());
        for participant in participants {
            match self.manager.recover(participant.as_ref()) {
                Ok(report) => {
                    if report.has_issues() {
                        warn!("{}", report.summary());
                    }
                    reports.push(report);
                }
                Err(e) => {
                    warn!(
                        rm = participant.resource_manager_name(),
                        completed = reports.len(),
                        error = %e,
                        "Recovery aborted"
                    );
                    return Err(Error::from(e));
                }
            }
        }
        Ok(reports)
    }

    /// Get transaction manager metrics.
    pub fn metrics(&self) -> ManagerMetrics {
        self.manager.metrics()
    }
}

/// Builder for coordinator configuration.
///
/// # Example
///
/// ```ignore
/// // Production: file-backed log, fsync on commit decisions
/// let coordinator = Coordinator::builder()
///     .coordinator_id("orders-node-1")
///     .log_dir("./txlog")
///     .default_timeout(30)
///     .open()?;
///
/// // Integration testing: files but no fsync
/// let coordinator = Coordinator::builder()
///     .coordinator_id("test")
///     .log_dir(tmp.path())
///     .no_durability()
///     .open()?;
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    /// Set the coordinator identity.
    pub fn coordinator_id(mut self, id: impl Into<String>) -> Self {
        self.config.coordinator_id = id.into();
        self
    }

    /// Set the transaction log directory.
    pub fn log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Never fsync the log. A crash may lose commit decisions.
    pub fn no_durability(mut self) -> Self {
        self.config.durability = DurabilityMode::None;
        self
    }

    /// fsync every log record.
    pub fn strict(mut self) -> Self {
        self.config.durability = DurabilityMode::Strict;
        self
    }

    /// Participant timeout for new transactions, in seconds.
    pub fn default_timeout(mut self, seconds: u32) -> Self {
        self.config.default_timeout_secs = seconds;
        self
    }

    /// Enable or disable one-phase commit for single-branch transactions.
    pub fn one_phase_optimization(mut self, enabled: bool) -> Self {
        self.config.one_phase_optimization = enabled;
        self
    }

    /// Open the coordinator.
    ///
    /// Uses the file-backed log if a directory was set, memory otherwise.
    pub fn open(self) -> Result<Coordinator> {
        Coordinator::from_config(self.config)
    }

    /// Open the coordinator with an in-memory log, ignoring any directory.
    pub fn ephemeral(mut self) -> Result<Coordinator> {
        self.config.log_dir = None;
        Coordinator::from_config(self.config)
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
