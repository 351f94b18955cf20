//! Centralized directory paths for the timer engine.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/fae/` | `~/.local/share/fae/` |
//! | Config | `~/Library/Application Support/fae/` | `~/.config/fae/` |
//!
//! # Environment Overrides
//!
//! - `FAE_DATA_DIR` overrides [`data_dir`]
//! - `FAE_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the persisted timer store. Resolves to `dirs::data_dir()/fae/` by
/// default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FAE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("fae"))
        .unwrap_or_else(|| PathBuf::from("/tmp/fae-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/fae/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("FAE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("fae"))
        .unwrap_or_else(|| PathBuf::from("/tmp/fae-config"))
}

/// Timer engine config file (`config_dir()/timers.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("timers.toml")
}

/// Persisted timer store (`data_dir()/timers.json`).
#[must_use]
pub fn timers_file() -> PathBuf {
    data_dir().join("timers.json")
}
