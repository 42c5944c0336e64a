// src/user/lifecycle.rs

//! Service user lifecycle
//!
//! A service account is either absent or present. Acquisition collapses
//! both into the same steady state:
//!
//! - **create**: pick a UID and run `useradd` inside one uid-allocation
//!   critical section (retried with backoff when an outside actor races us
//!   to the UID), then register a subordinate-ID block. Once the account
//!   exists, any later failure deletes it again before the error surfaces.
//! - **verify**: the account must already look exactly like one divban
//!   would have made (UID in range, expected home, non-interactive shell,
//!   `gid == uid`). A mismatch is fatal and nothing is touched.
//! - **delete**: idempotent; also sweeps registry entries orphaned by an
//!   interrupted run.

use super::allocator::{AllocationRange, PasswdEntry, UidAllocator, is_non_interactive_shell};
use super::{
    Acquired, ServiceUser, gid_for_uid, home_dir_for, subid, username_for_service,
};
use crate::error::{Error, Result};
use crate::lock::{LockManager, SUBID_CONFIG_LOCK, UID_ALLOCATION_LOCK};
use crate::paths::SystemPaths;
use crate::process::{CommandOutput, CommandRunner, ExecOptions};
use crate::settings::Settings;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// `useradd`: UID already in use
const USERADD_UID_IN_USE: i32 = 4;

/// `useradd`: username already in use
const USERADD_NAME_IN_USE: i32 = 9;

/// `userdel`: user does not exist
const USERDEL_NO_SUCH_USER: i32 = 6;

/// `userdel`: account removed but the home directory was not
const USERDEL_HOME_NOT_REMOVED: i32 = 12;

/// "uid 10000 is not unique", "UID 10000 already in use", ...
static UID_CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\buid\s+\d+\b.*\b(not unique|exists|already in use)").unwrap()
});

/// Result of one locked allocate-and-create attempt
enum CreateAttempt {
    Created(u32),
    Conflict(u32),
}

/// Whether a failed `useradd` lost a race for its UID
///
/// The exit status is authoritative: 4 is a conflict, 9 (name taken) never
/// is. Some useradd builds and wrappers report the condition with another
/// status, so stderr is matched as a fallback: a `uid <number>` token
/// followed by "not unique", "exists" or "already in use"
/// (case-insensitive; commands run with `LC_ALL=C`).
pub fn is_uid_conflict(output: &CommandOutput) -> bool {
    match output.exit_code {
        Some(0) | Some(USERADD_NAME_IN_USE) => false,
        Some(USERADD_UID_IN_USE) => true,
        _ => UID_CONFLICT_RE.is_match(&output.stderr),
    }
}

/// Creates, verifies and deletes service accounts
pub struct UserManager<'a> {
    runner: &'a dyn CommandRunner,
    settings: &'a Settings,
    paths: SystemPaths,
    locks: LockManager,
}

impl<'a> UserManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, settings: &'a Settings) -> Self {
        Self {
            runner,
            settings,
            paths: settings.system_paths(),
            locks: settings.lock_manager(),
        }
    }

    pub fn allocator(&self) -> UidAllocator<'_> {
        UidAllocator::new(self.runner, &self.paths)
    }

    fn expected_home(&self, username: &str) -> std::path::PathBuf {
        home_dir_for(&self.settings.users.home_base, username)
    }

    /// Create the account for `service`, or verify the one already there
    pub fn acquire_service_user(&self, service: &str) -> Result<Acquired<ServiceUser>> {
        let username = username_for_service(service)?;
        let home = self.expected_home(&username);

        match self.allocator().lookup_user(&username)? {
            Some(entry) => {
                debug!("User '{}' exists, verifying", username);
                self.verify_service_user(&entry, &home)
                    .map(Acquired::existing)
            }
            None => self
                .create_service_user(service, &username, &home)
                .map(Acquired::created),
        }
    }

    fn create_service_user(&self, service: &str, username: &str, home: &Path) -> Result<ServiceUser> {
        let shell = self.allocator().get_nologin_shell();
        let uid = self.create_account_with_retry(service, username, home, &shell)?;

        // The account exists from here on; undo it if the rest fails
        let range = match self.ensure_subid_range(username) {
            Ok(range) => range,
            Err(e) => {
                warn!(
                    "Subordinate ID setup for '{}' failed, deleting the new account: {}",
                    username, e
                );
                if let Err(cleanup) = self.delete_user(username) {
                    warn!("Failed to delete '{}' after error: {}", username, cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "Created service user '{}' (uid {}, subuid {}:{})",
            username, uid, range.start, range.size
        );
        Ok(ServiceUser {
            username: username.to_string(),
            uid,
            gid: gid_for_uid(uid),
            subuid_start: range.start,
            subuid_size: range.size,
            home_dir: home.to_path_buf(),
        })
    }

    /// Allocate a UID and create the account, retrying on UID races
    ///
    /// Each attempt holds the uid-allocation lock across both the scan and
    /// `useradd`. Conflicts can still come from tools that ignore the lock.
    fn create_account_with_retry(
        &self,
        service: &str,
        username: &str,
        home: &Path,
        shell: &str,
    ) -> Result<u32> {
        let retry = &self.settings.retry;

        for attempt in 1..=retry.max_attempts {
            let outcome = self.locks.with_lock(UID_ALLOCATION_LOCK, || {
                self.try_create_account(service, username, home, shell)
            })?;

            match outcome {
                CreateAttempt::Created(uid) => return Ok(uid),
                CreateAttempt::Conflict(uid) if attempt < retry.max_attempts => {
                    let delay = retry.delay_after(attempt);
                    warn!(
                        "UID {} was taken while creating '{}' (attempt {}/{}), retrying in {:?}",
                        uid, username, attempt, retry.max_attempts, delay
                    );
                    std::thread::sleep(delay);
                }
                CreateAttempt::Conflict(uid) => {
                    warn!(
                        "UID {} was taken while creating '{}' (attempt {}/{})",
                        uid, username, attempt, retry.max_attempts
                    );
                }
            }
        }

        Err(Error::UidConflict {
            username: username.to_string(),
            attempts: retry.max_attempts,
        })
    }

    /// One locked attempt; the caller holds the uid-allocation lock
    fn try_create_account(
        &self,
        service: &str,
        username: &str,
        home: &Path,
        shell: &str,
    ) -> Result<CreateAttempt> {
        let uid = self.allocator().allocate_uid(&self.settings.users)?;
        let uid_arg = uid.to_string();
        let home_arg = home.to_string_lossy();
        let comment = format!("divban service {}", service);

        let argv = [
            "useradd",
            "--uid",
            uid_arg.as_str(),
            "--user-group",
            "--create-home",
            "--home-dir",
            home_arg.as_ref(),
            "--shell",
            shell,
            "--comment",
            comment.as_str(),
            username,
        ];
        let output = self
            .runner
            .exec(&argv, &ExecOptions::new().with_env("LC_ALL", "C"))?;

        if output.success() {
            debug!("useradd created '{}' with uid {}", username, uid);
            Ok(CreateAttempt::Created(uid))
        } else if is_uid_conflict(&output) {
            Ok(CreateAttempt::Conflict(uid))
        } else {
            Err(Error::CommandFailed {
                command: argv.join(" "),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Make sure `username` has a registered subordinate-ID block
    ///
    /// Reuses a block already in `/etc/subuid` or `/etc/subgid` (left
    /// behind by an interrupted run) instead of allocating a second one, and
    /// writes it to whichever file lacks it.
    fn ensure_subid_range(&self, username: &str) -> Result<AllocationRange> {
        self.locks.with_lock(SUBID_CONFIG_LOCK, || {
            let allocator = self.allocator();
            let existing = match allocator.existing_subuid_range(username)? {
                Some(range) => Some(range),
                None => allocator.existing_subgid_range(username)?,
            };
            let range = match existing {
                Some(range) => {
                    debug!(
                        "Reusing registered subordinate IDs {}:{} for '{}'",
                        range.start, range.size, username
                    );
                    range
                }
                None => allocator
                    .allocate_subuid_range(self.settings.users.subuid_size, &self.settings.users)?,
            };
            subid::write_entries(&self.paths, username, range)?;
            Ok(range)
        })
    }

    /// Check an existing account against what divban would have created
    ///
    /// Every field is checked before anything is written. Only when the
    /// account itself passes is a missing registry entry filled in.
    pub fn verify_service_user(&self, entry: &PasswdEntry, expected_home: &Path) -> Result<ServiceUser> {
        let users = &self.settings.users;
        let mismatch = |field: &'static str, expected: String, actual: String| Error::UserMismatch {
            username: entry.name.clone(),
            field,
            expected,
            actual,
        };

        if entry.uid < users.uid_range_start || entry.uid > users.uid_range_end {
            return Err(mismatch(
                "uid",
                format!("{}-{}", users.uid_range_start, users.uid_range_end),
                entry.uid.to_string(),
            ));
        }
        if entry.gid != gid_for_uid(entry.uid) {
            return Err(mismatch(
                "gid",
                gid_for_uid(entry.uid).to_string(),
                entry.gid.to_string(),
            ));
        }
        if entry.home != expected_home {
            return Err(mismatch(
                "home",
                expected_home.display().to_string(),
                entry.home.display().to_string(),
            ));
        }
        if !is_non_interactive_shell(&entry.shell) {
            return Err(mismatch(
                "shell",
                "a nologin shell".to_string(),
                entry.shell.clone(),
            ));
        }

        let allocator = self.allocator();
        let subuid = allocator.existing_subuid_range(&entry.name)?;
        let subgid = allocator.existing_subgid_range(&entry.name)?;
        let range = match (subuid, subgid) {
            (Some(uid_range), Some(gid_range)) if uid_range == gid_range => uid_range,
            _ => {
                warn!(
                    "Subordinate IDs of '{}' are incomplete, completing setup",
                    entry.name
                );
                self.ensure_subid_range(&entry.name)?
            }
        };

        Ok(ServiceUser {
            username: entry.name.clone(),
            uid: entry.uid,
            gid: entry.gid,
            subuid_start: range.start,
            subuid_size: range.size,
            home_dir: entry.home.clone(),
        })
    }

    /// Undo [`acquire_service_user`](Self::acquire_service_user)
    ///
    /// Only deletes when this run created the account. Never fails; problems
    /// are logged.
    pub fn release_service_user(&self, service: &str, was_created: bool) {
        if !was_created {
            debug!("Keeping pre-existing user for '{}'", service);
            return;
        }
        if let Err(e) = self.delete_service_user(service) {
            warn!("Failed to remove user for '{}': {}", service, e);
        }
    }

    /// Remove the account for `service` and its registry entries
    ///
    /// Returns whether an account was deleted. Succeeds when there is
    /// nothing to delete.
    pub fn delete_service_user(&self, service: &str) -> Result<bool> {
        let username = username_for_service(service)?;
        self.delete_user(&username)
    }

    fn delete_user(&self, username: &str) -> Result<bool> {
        let existed = self.allocator().user_exists(username)?;
        if existed {
            self.run_userdel(username)?;
        } else {
            debug!("User '{}' does not exist, nothing to delete", username);
        }

        // The UID is already free; a stale registry line is only noise
        match subid::remove_entries_locked(&self.locks, &self.paths, username) {
            Ok(true) if !existed => info!("Removed orphaned subordinate IDs of '{}'", username),
            Ok(_) => {}
            Err(e) => warn!("Failed to remove subordinate IDs of '{}': {}", username, e),
        }

        Ok(existed)
    }

    fn run_userdel(&self, username: &str) -> Result<()> {
        let argv = ["userdel", "--remove", username];
        let output = self
            .runner
            .exec(&argv, &ExecOptions::new().with_env("LC_ALL", "C"))?;

        match output.exit_code {
            Some(0) => info!("Deleted user '{}'", username),
            Some(USERDEL_NO_SUCH_USER) => debug!("User '{}' already gone", username),
            Some(USERDEL_HOME_NOT_REMOVED) => warn!(
                "Deleted user '{}' but its home directory was not removed: {}",
                username,
                output.stderr.trim()
            ),
            code => {
                return Err(Error::CommandFailed {
                    command: argv.join(" "),
                    code,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Re-derive the identity of an already provisioned service
    pub fn resolve_service_user(&self, service: &str) -> Result<ServiceUser> {
        let username = username_for_service(service)?;
        let allocator = self.allocator();
        let entry = allocator
            .lookup_user(&username)?
            .ok_or_else(|| Error::UserNotFound(username.clone()))?;
        let range = allocator
            .existing_subuid_range(&username)?
            .ok_or_else(|| Error::UserMismatch {
                username: username.clone(),
                field: "subordinate IDs",
                expected: "a registered range".to_string(),
                actual: "none".to_string(),
            })?;

        Ok(ServiceUser {
            username,
            uid: entry.uid,
            gid: entry.gid,
            subuid_start: range.start,
            subuid_size: range.size,
            home_dir: entry.home,
        })
    }
}
