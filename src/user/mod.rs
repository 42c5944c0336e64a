// src/user/mod.rs

//! Service user identities
//!
//! Each service runs under its own unprivileged account named
//! `divban-<service>`. The identity is never persisted by divban: the OS
//! user database and the subordinate-ID registry are the single source of
//! truth, and a [`ServiceUser`] is re-derived from them whenever a command
//! needs it.
//!
//! - `allocator`: free UID / subordinate-ID range selection
//! - `subid`: `/etc/subuid` and `/etc/subgid` editing
//! - `lifecycle`: create / verify / delete state machine

pub mod allocator;
pub mod lifecycle;
pub mod subid;

pub use allocator::{AllocationRange, PasswdEntry, UidAllocator};
pub use lifecycle::UserManager;

use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Prefix shared by every service account
pub const USERNAME_PREFIX: &str = "divban-";

/// POSIX limit enforced by shadow-utils
pub const MAX_USERNAME_LEN: usize = 32;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").unwrap());

static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());

/// The provisioned identity of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUser {
    pub username: String,
    pub uid: u32,
    /// Always derived from `uid`, see [`gid_for_uid`]
    pub gid: u32,
    pub subuid_start: u32,
    pub subuid_size: u32,
    pub home_dir: PathBuf,
}

impl ServiceUser {
    /// Subordinate-ID block as a range value
    pub fn subuid_range(&self) -> AllocationRange {
        AllocationRange::new(self.subuid_start, self.subuid_size)
    }
}

/// A resource obtained during setup, tagged with whether this run made it
///
/// Rollback must branch on `was_created`, never on whether the resource
/// happens to exist right now: a user left by an earlier successful run is
/// never deleted by a failed re-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired<T> {
    pub value: T,
    pub was_created: bool,
}

impl<T> Acquired<T> {
    pub fn created(value: T) -> Self {
        Self {
            value,
            was_created: true,
        }
    }

    pub fn existing(value: T) -> Self {
        Self {
            value,
            was_created: false,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Acquired<U> {
        Acquired {
            value: f(self.value),
            was_created: self.was_created,
        }
    }
}

/// Group ID for a service user's primary group
///
/// Groups are never allocated on their own; the user group shares the UID.
pub const fn gid_for_uid(uid: u32) -> u32 {
    uid
}

/// Check a service name before deriving anything from it
pub fn validate_service_name(name: &str) -> Result<()> {
    if SERVICE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidServiceName {
            name: name.to_string(),
            reason: "must match [a-z][a-z0-9-]*".to_string(),
        })
    }
}

/// Check a username against POSIX/shadow-utils rules
pub fn validate_username(username: &str) -> Result<()> {
    if username.len() <= MAX_USERNAME_LEN && USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(Error::InvalidUsername(username.to_string()))
    }
}

/// Derive the account name for a service (`caddy` -> `divban-caddy`)
pub fn username_for_service(service: &str) -> Result<String> {
    validate_service_name(service)?;
    let username = format!("{}{}", USERNAME_PREFIX, service);
    validate_username(&username).map_err(|_| Error::InvalidServiceName {
        name: service.to_string(),
        reason: format!(
            "derived username '{}' exceeds {} characters",
            username, MAX_USERNAME_LEN
        ),
    })?;
    Ok(username)
}

/// Home directory for a service account
pub fn home_dir_for(home_base: &Path, username: &str) -> PathBuf {
    home_base.join(username)
}
