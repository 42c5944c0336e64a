// src/system/linger.rs

//! Persistent login sessions
//!
//! systemd-logind records a lingering user as an empty file under
//! `/var/lib/systemd/linger/`. That marker is read to decide whether
//! anything needs doing; changes always go through `loginctl`.

use crate::error::Result;
use crate::paths::SystemPaths;
use crate::process::{CommandRunner, ExecOptions};
use crate::user::Acquired;
use tracing::{debug, info};

/// Whether `username` currently lingers
pub fn linger_enabled(paths: &SystemPaths, username: &str) -> bool {
    paths.linger_dir().join(username).exists()
}

/// Enable lingering; `was_created` is false if it was already on
pub fn enable_linger(
    runner: &dyn CommandRunner,
    paths: &SystemPaths,
    username: &str,
) -> Result<Acquired<()>> {
    if linger_enabled(paths, username) {
        debug!("Linger already enabled for '{}'", username);
        return Ok(Acquired::existing(()));
    }

    runner.exec_success(&["loginctl", "enable-linger", username], &ExecOptions::new())?;
    info!("Enabled linger for '{}'", username);
    Ok(Acquired::created(()))
}

/// Disable lingering; returns whether it was on
pub fn disable_linger(runner: &dyn CommandRunner, paths: &SystemPaths, username: &str) -> Result<bool> {
    if !linger_enabled(paths, username) {
        debug!("Linger not enabled for '{}'", username);
        return Ok(false);
    }

    runner.exec_success(&["loginctl", "disable-linger", username], &ExecOptions::new())?;
    info!("Disabled linger for '{}'", username);
    Ok(true)
}
