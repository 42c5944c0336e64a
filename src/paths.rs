// src/paths.rs
//! Centralized path derivation for system files divban touches
//!
//! All paths are resolved under a configurable root, `/` on a live system
//! and a scratch directory in tests.

use std::path::{Path, PathBuf};

/// Candidate non-interactive shells, in preference order
pub const NOLOGIN_SHELLS: &[&str] = &["/usr/sbin/nologin", "/sbin/nologin", "/usr/bin/nologin"];

/// Last-resort non-interactive shell
pub const FALLBACK_SHELL: &str = "/bin/false";

/// Root-relative locations of the shared system state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    root: PathBuf,
}

impl SystemPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths of the live system
    pub fn live() -> Self {
        Self::new("/")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an absolute system path under the root
    pub fn resolve(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    pub fn subuid(&self) -> PathBuf {
        self.resolve("/etc/subuid")
    }

    pub fn subgid(&self) -> PathBuf {
        self.resolve("/etc/subgid")
    }

    /// Marker directory systemd-logind keeps for lingering users
    pub fn linger_dir(&self) -> PathBuf {
        self.resolve("/var/lib/systemd/linger")
    }

    pub fn sysctl_dropin_dir(&self) -> PathBuf {
        self.resolve("/etc/sysctl.d")
    }

    /// `/proc/sys` file backing a dotted sysctl key
    pub fn proc_sys(&self, key: &str) -> PathBuf {
        self.resolve("/proc/sys").join(key.replace('.', "/"))
    }
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self::live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_paths() {
        let paths = SystemPaths::live();
        assert_eq!(paths.subuid(), PathBuf::from("/etc/subuid"));
        assert_eq!(paths.subgid(), PathBuf::from("/etc/subgid"));
        assert_eq!(
            paths.linger_dir(),
            PathBuf::from("/var/lib/systemd/linger")
        );
    }

    #[test]
    fn test_target_root_paths() {
        let paths = SystemPaths::new("/tmp/rootfs");
        assert_eq!(paths.subuid(), PathBuf::from("/tmp/rootfs/etc/subuid"));
        assert_eq!(
            paths.proc_sys("net.ipv4.ip_unprivileged_port_start"),
            PathBuf::from("/tmp/rootfs/proc/sys/net/ipv4/ip_unprivileged_port_start")
        );
    }
}
