//! Configuration for the timer engine.
//!
//! Loaded from `config_dir()/timers.toml`. Every section is optional.
//!
//! ```toml
//! store_path = "/var/lib/fae/timers.json"
//! pre_expiry_warning_secs = 10
//! use_24_hour_time = false
//! default_owner = "kitchen"
//!
//! [owners]
//! "satellite-1" = "kitchen"
//! ```

use crate::error::{Result, TimerError};
use crate::timers::owner::StaticOwnerResolver;
use crate::timers::scheduler::{DEFAULT_PRE_EXPIRY_WARNING_SECS, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level timer engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimersConfig {
    /// Persisted store location (None = `data_dir()/timers.json`).
    pub store_path: Option<PathBuf>,
    /// Seconds between the warning event and expiry.
    pub pre_expiry_warning_secs: u64,
    /// Render time labels on the 24-hour clock.
    pub use_24_hour_time: bool,
    /// Owner used when a request names none.
    pub default_owner: Option<String>,
    /// Accept owners missing from the alias table as-is.
    pub accept_unknown_owners: bool,
    /// Device id → owner aliases.
    pub owners: HashMap<String, String>,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            pre_expiry_warning_secs: DEFAULT_PRE_EXPIRY_WARNING_SECS,
            use_24_hour_time: false,
            default_owner: None,
            accept_unknown_owners: true,
            owners: HashMap::new(),
        }
    }
}

impl TimersConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TimerError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::from_file(path) {
            Err(TimerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Save configuration atomically, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| TimerError::Config(e.to_string()))?;
        crate::timers::store::write_atomic(path, content.as_bytes())
    }

    /// Default config file path: `config_dir()/timers.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::fae_dirs::config_file()
    }

    /// Effective store path.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(crate::fae_dirs::timers_file)
    }

    /// Owner resolver built from the alias table.
    #[must_use]
    pub fn owner_resolver(&self) -> StaticOwnerResolver {
        StaticOwnerResolver::new(self.owners.clone()).accept_unknown(self.accept_unknown_owners)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pre_expiry_warning: self.pre_expiry_warning_secs,
            use_24h: self.use_24_hour_time,
        }
    }
}
