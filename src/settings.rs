// src/settings.rs

//! Global divban settings
//!
//! Loaded from a TOML file (default `/etc/divban/divban.toml`). Every field
//! has a default, and a missing file means "all defaults".
//!
//! # Example divban.toml
//!
//! ```toml
//! [users]
//! uid_range_start = 10000
//! uid_range_end = 59999
//! subuid_range_start = 100000
//! subuid_size = 65536
//! home_base = "/srv"
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 100
//! max_delay_ms = 2000
//!
//! [paths]
//! root = "/"
//! lock_dir = "/run/lock/divban"
//! ```

use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::paths::SystemPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default path for the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/divban/divban.toml";

/// UID and subordinate-ID allocation bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// First primary UID divban may hand out (inclusive)
    pub uid_range_start: u32,
    /// Last primary UID divban may hand out (inclusive)
    pub uid_range_end: u32,
    /// Subordinate-ID ranges are allocated at or above this value
    pub subuid_range_start: u32,
    /// Size of the subordinate-ID block granted to each service user
    pub subuid_size: u32,
    /// Parent directory of service user homes
    pub home_base: PathBuf,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            uid_range_start: 10000,
            uid_range_end: 59999,
            subuid_range_start: 100000,
            subuid_size: 65536,
            home_base: PathBuf::from("/srv"),
        }
    }
}

/// Backoff schedule for UID-conflict retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetrySettings {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Doubles per attempt: base, 2*base, 4*base, ... capped at `max_delay_ms`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Where system state lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub root: PathBuf,
    pub lock_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            lock_dir: PathBuf::from(LockManager::DEFAULT_DIR),
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub users: UserSettings,
    pub retry: RetrySettings,
    pub paths: PathSettings,
}

impl Settings {
    /// Load settings from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(path, e)),
        };
        Self::parse(&content, path)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let settings: Settings = toml::from_str(content).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let users = &self.users;
        if users.uid_range_start > users.uid_range_end {
            return Err(Error::InvalidSettings(format!(
                "uid_range_start ({}) is above uid_range_end ({})",
                users.uid_range_start, users.uid_range_end
            )));
        }
        if users.subuid_size == 0 {
            return Err(Error::InvalidSettings(
                "subuid_size must be greater than zero".to_string(),
            ));
        }
        if !users.home_base.is_absolute() {
            return Err(Error::InvalidSettings(format!(
                "home_base must be absolute, got {}",
                users.home_base.display()
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidSettings(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn system_paths(&self) -> SystemPaths {
        SystemPaths::new(&self.paths.root)
    }

    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(&self.paths.lock_dir)
    }
}
