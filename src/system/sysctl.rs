// src/system/sysctl.rs

//! Unprivileged low ports
//!
//! Services that bind 80/443 as their own user need
//! `net.ipv4.ip_unprivileged_port_start` at or below 80. The setting is
//! persisted with a sysctl.d drop-in and applied immediately with
//! `sysctl -w`. It is one-time host configuration and is never reverted.

use crate::error::{Error, Result};
use crate::filesystem::atomic_write;
use crate::paths::SystemPaths;
use crate::process::{CommandRunner, ExecOptions};
use tracing::{debug, info};

pub const UNPRIVILEGED_PORT_KEY: &str = "net.ipv4.ip_unprivileged_port_start";

/// Lowest port the setting has to reach
pub const REQUIRED_PORT_START: u32 = 80;

pub const DROPIN_NAME: &str = "50-divban-unprivileged-ports.conf";

/// Current value of a numeric sysctl, `None` if the key is absent
pub fn read_sysctl(paths: &SystemPaths, key: &str) -> Result<Option<u32>> {
    let path = paths.proc_sys(key);
    match std::fs::read_to_string(&path) {
        Ok(content) => content
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::MalformedEntry {
                source_name: path.display().to_string(),
                line: content.trim().to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Whether unprivileged users may already bind port 80
pub fn unprivileged_ports_configured(paths: &SystemPaths) -> Result<bool> {
    Ok(read_sysctl(paths, UNPRIVILEGED_PORT_KEY)?.is_some_and(|v| v <= REQUIRED_PORT_START))
}

/// Persist and apply the setting; returns whether anything changed
pub fn ensure_unprivileged_ports(runner: &dyn CommandRunner, paths: &SystemPaths) -> Result<bool> {
    if unprivileged_ports_configured(paths)? {
        debug!("{} already <= {}", UNPRIVILEGED_PORT_KEY, REQUIRED_PORT_START);
        return Ok(false);
    }

    let dropin = paths.sysctl_dropin_dir().join(DROPIN_NAME);
    let content = format!(
        "# Written by divban: allow rootless services to bind HTTP/HTTPS\n{} = {}\n",
        UNPRIVILEGED_PORT_KEY, REQUIRED_PORT_START
    );
    atomic_write(&dropin, content.as_bytes(), 0o644)?;

    let setting = format!("{}={}", UNPRIVILEGED_PORT_KEY, REQUIRED_PORT_START);
    runner.exec_success(&["sysctl", "-w", &setting], &ExecOptions::new())?;
    info!("Applied sysctl '{}'", setting);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSystem;
    use std::fs;

    fn set_current(paths: &SystemPaths, value: &str) {
        let path = paths.proc_sys(UNPRIVILEGED_PORT_KEY);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, value).unwrap();
    }

    #[test]
    fn test_applies_when_port_start_high() {
        let system = FakeSystem::new();
        let paths = system.paths();
        set_current(&paths, "1024\n");

        assert!(ensure_unprivileged_ports(&system, &paths).unwrap());
        assert!(unprivileged_ports_configured(&paths).unwrap());

        let dropin = fs::read_to_string(paths.sysctl_dropin_dir().join(DROPIN_NAME)).unwrap();
        assert!(dropin.contains("net.ipv4.ip_unprivileged_port_start = 80"));
    }

    #[test]
    fn test_already_low_is_left_alone() {
        let system = FakeSystem::new();
        let paths = system.paths();
        set_current(&paths, "0\n");

        assert!(!ensure_unprivileged_ports(&system, &paths).unwrap());
        assert!(system.calls_to("sysctl").is_empty());
        assert!(!paths.sysctl_dropin_dir().join(DROPIN_NAME).exists());
    }

    #[test]
    fn test_garbage_value_is_error() {
        let system = FakeSystem::new();
        let paths = system.paths();
        set_current(&paths, "lots");

        assert!(matches!(
            unprivileged_ports_configured(&paths).unwrap_err(),
            Error::MalformedEntry { .. }
        ));
    }
}
