//! Coordinator configuration.
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! coordinator_id = "orders-node-1"
//! log_dir = "/var/lib/orders/txlog"
//! durability = "critical"
//! default_timeout_secs = 30
//! one_phase_optimization = true
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use twopc_durability::DurabilityMode;

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Identity embedded in every global id this coordinator creates.
    ///
    /// Must be unique among coordinators sharing a log directory or a
    /// resource manager. Only the first 52 bytes are significant.
    pub coordinator_id: String,
    /// Transaction log directory. No directory means an in-memory log.
    pub log_dir: Option<PathBuf>,
    /// When log writes are synced to disk
    pub durability: DurabilityMode,
    /// Participant timeout for new transactions (0 = participant default)
    pub default_timeout_secs: u32,
    /// Commit single-branch transactions without a prepare round
    pub one_phase_optimization: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: String::new(),
            log_dir: None,
            durability: DurabilityMode::default(),
            default_timeout_secs: 0,
            one_phase_optimization: true,
        }
    }
}

impl CoordinatorConfig {
    /// Config with the given identity and defaults elsewhere.
    pub fn new(coordinator_id: impl Into<String>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject settings no coordinator can run with.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator_id.is_empty() {
            return Err(Error::Config("coordinator_id must not be empty".to_string()));
        }
        if matches!(&self.log_dir, Some(dir) if dir.as_os_str().is_empty()) {
            return Err(Error::Config("log_dir must not be empty".to_string()));
        }
        Ok(())
    }
}
