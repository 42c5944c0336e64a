// src/user/allocator.rs

//! UID and subordinate-ID allocation
//!
//! The allocator is stateless: every call re-reads the user database
//! (`getent passwd`/`getent group`) and the subordinate-ID registry, so the
//! OS stays the single source of truth. It does not lock anything itself;
//! callers compose it with account creation or registry writes inside the
//! appropriate critical section (see `crate::lock`).

use super::subid::{self, SubidEntry};
use crate::error::{Error, Result};
use crate::paths::{FALLBACK_SHELL, NOLOGIN_SHELLS, SystemPaths};
use crate::process::{CommandRunner, ExecOptions};
use crate::settings::UserSettings;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// `getent` exit status for "key not found"
const GETENT_NOT_FOUND: i32 = 2;

/// A contiguous `[start, start + size)` block of numeric IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AllocationRange {
    pub start: u32,
    pub size: u32,
}

impl AllocationRange {
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// Exclusive end, widened so `u32::MAX + 1` is representable
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.size)
    }

    pub fn overlaps(&self, other: &AllocationRange) -> bool {
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }
}

/// One line of the passwd database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

impl PasswdEntry {
    /// Parse `name:passwd:uid:gid:gecos:home:shell`
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || Error::MalformedEntry {
            source_name: "passwd".to_string(),
            line: line.to_string(),
        };

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return Err(malformed());
        }

        Ok(Self {
            name: fields[0].to_string(),
            uid: fields[2].parse().map_err(|_| malformed())?,
            gid: fields[3].parse().map_err(|_| malformed())?,
            home: PathBuf::from(fields[5]),
            shell: fields[6].to_string(),
        })
    }
}

/// Whether `shell` refuses interactive logins
pub fn is_non_interactive_shell(shell: &str) -> bool {
    NOLOGIN_SHELLS.contains(&shell) || shell == FALLBACK_SHELL || shell == "/usr/bin/false"
}

/// Lowest value in `[start, end]` not present in `used`
pub fn lowest_free_id(used: &BTreeSet<u32>, start: u32, end: u32) -> Option<u32> {
    let mut candidate = start;
    for &id in used.range(start..=end) {
        if id != candidate {
            break;
        }
        candidate = candidate.checked_add(1)?;
    }
    (candidate <= end).then_some(candidate)
}

/// Lowest `start >= floor` such that `[start, start + size)` avoids every
/// existing range, or `None` if it would run past the 32-bit ID space
pub fn first_fit(existing: &[AllocationRange], floor: u32, size: u32) -> Option<AllocationRange> {
    let mut sorted: Vec<AllocationRange> = existing.to_vec();
    sorted.sort();

    let mut candidate = u64::from(floor);
    for range in &sorted {
        if range.end() <= candidate {
            continue;
        }
        if candidate + u64::from(size) <= u64::from(range.start) {
            break;
        }
        candidate = range.end();
    }

    let end = candidate + u64::from(size);
    if end > u64::from(u32::MAX) + 1 {
        return None;
    }
    u32::try_from(candidate)
        .ok()
        .map(|start| AllocationRange::new(start, size))
}

/// Reads system state and picks free IDs
pub struct UidAllocator<'a> {
    runner: &'a dyn CommandRunner,
    paths: &'a SystemPaths,
}

impl<'a> UidAllocator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, paths: &'a SystemPaths) -> Self {
        Self { runner, paths }
    }

    /// Every account in the user database
    pub fn passwd_entries(&self) -> Result<Vec<PasswdEntry>> {
        let output = self
            .runner
            .exec_success(&["getent", "passwd"], &ExecOptions::new())?;
        output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(PasswdEntry::parse)
            .collect()
    }

    /// Every GID in the group database
    pub fn group_ids(&self) -> Result<Vec<u32>> {
        let output = self
            .runner
            .exec_success(&["getent", "group"], &ExecOptions::new())?;
        output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split(':')
                    .nth(2)
                    .and_then(|gid| gid.parse().ok())
                    .ok_or_else(|| Error::MalformedEntry {
                        source_name: "group".to_string(),
                        line: line.to_string(),
                    })
            })
            .collect()
    }

    /// Look up one account, `None` if it does not exist
    pub fn lookup_user(&self, username: &str) -> Result<Option<PasswdEntry>> {
        let output = self
            .runner
            .exec(&["getent", "passwd", username], &ExecOptions::new())?;

        match output.exit_code {
            Some(0) => {
                let line = output.stdout.lines().next().unwrap_or_default();
                PasswdEntry::parse(line).map(Some)
            }
            Some(GETENT_NOT_FOUND) => Ok(None),
            code => Err(Error::CommandFailed {
                command: format!("getent passwd {}", username),
                code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    pub fn get_uid_by_username(&self, username: &str) -> Result<Option<u32>> {
        Ok(self.lookup_user(username)?.map(|entry| entry.uid))
    }

    pub fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.lookup_user(username)?.is_some())
    }

    /// First installed nologin shell, `/bin/false` if none is present
    pub fn get_nologin_shell(&self) -> String {
        NOLOGIN_SHELLS
            .iter()
            .find(|shell| self.paths.resolve(shell).exists())
            .map(|shell| shell.to_string())
            .unwrap_or_else(|| FALLBACK_SHELL.to_string())
    }

    /// Lowest UID in the configured range that is free as both UID and GID
    ///
    /// Must run under the uid-allocation lock together with account creation.
    pub fn allocate_uid(&self, users: &UserSettings) -> Result<u32> {
        let mut used: BTreeSet<u32> = self
            .passwd_entries()?
            .into_iter()
            .map(|entry| entry.uid)
            .collect();
        // The user group takes the same number as the UID
        used.extend(self.group_ids()?);

        lowest_free_id(&used, users.uid_range_start, users.uid_range_end).ok_or(
            Error::UidRangeExhausted {
                start: users.uid_range_start,
                end: users.uid_range_end,
            },
        )
    }

    /// All ranges currently registered in `/etc/subuid` and `/etc/subgid`
    pub fn registered_subid_ranges(&self) -> Result<Vec<SubidEntry>> {
        let mut entries = subid::read_registry(&self.paths.subuid())?.into_entries();
        entries.extend(subid::read_registry(&self.paths.subgid())?.into_entries());
        Ok(entries)
    }

    /// Lowest free subordinate-ID block of `size` at or above the configured start
    ///
    /// Must run under the subid-config lock together with the registry write.
    pub fn allocate_subuid_range(&self, size: u32, users: &UserSettings) -> Result<AllocationRange> {
        let existing: Vec<AllocationRange> = self
            .registered_subid_ranges()?
            .into_iter()
            .map(|entry| entry.range)
            .collect();

        first_fit(&existing, users.subuid_range_start, size).ok_or(Error::SubuidRangeExhausted {
            start: users.subuid_range_start,
            size,
        })
    }

    /// Range previously registered for `username` in `/etc/subuid`
    pub fn existing_subuid_range(&self, username: &str) -> Result<Option<AllocationRange>> {
        let registry = subid::read_registry(&self.paths.subuid())?;
        Ok(registry.find(username).map(|entry| entry.range))
    }

    /// Range previously registered for `username` in `/etc/subgid`
    pub fn existing_subgid_range(&self, username: &str) -> Result<Option<AllocationRange>> {
        let registry = subid::read_registry(&self.paths.subgid())?;
        Ok(registry.find(username).map(|entry| entry.range))
    }

    pub fn get_existing_subuid_start(&self, username: &str) -> Result<Option<u32>> {
        Ok(self
            .existing_subuid_range(username)?
            .map(|range| range.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSystem;
    use std::fs;

    #[test]
    fn test_parse_passwd_entry() {
        let entry =
            PasswdEntry::parse("divban-caddy:x:10000:10000:divban service caddy:/srv/divban-caddy:/usr/sbin/nologin")
                .unwrap();
        assert_eq!(entry.name, "divban-caddy");
        assert_eq!(entry.uid, 10000);
        assert_eq!(entry.gid, 10000);
        assert_eq!(entry.home, PathBuf::from("/srv/divban-caddy"));
        assert_eq!(entry.shell, "/usr/sbin/nologin");

        assert!(PasswdEntry::parse("broken:x:abc:0:::").is_err());
        assert!(PasswdEntry::parse("short:x:1").is_err());
    }

    #[test]
    fn test_lowest_free_id() {
        let used: BTreeSet<u32> = [10000, 10001, 10003].into_iter().collect();
        assert_eq!(lowest_free_id(&used, 10000, 10010), Some(10002));
        assert_eq!(lowest_free_id(&used, 10003, 10003), None);
        assert_eq!(lowest_free_id(&BTreeSet::new(), 5, 5), Some(5));
        assert_eq!(lowest_free_id(&used, 9000, 9999), Some(9000));
    }

    #[test]
    fn test_first_fit_empty_registry() {
        assert_eq!(
            first_fit(&[], 100000, 65536),
            Some(AllocationRange::new(100000, 65536))
        );
    }

    #[test]
    fn test_first_fit_uses_gap() {
        let existing = [
            AllocationRange::new(100000, 65536),
            AllocationRange::new(296608, 65536),
        ];
        // Lowest gap between the two ranges
        assert_eq!(
            first_fit(&existing, 100000, 65536),
            Some(AllocationRange::new(165536, 65536))
        );
        // Too small for a bigger block, goes after the last range
        assert_eq!(
            first_fit(&existing, 100000, 140000),
            Some(AllocationRange::new(362144, 140000))
        );
    }

    #[test]
    fn test_first_fit_ignores_ranges_below_floor() {
        // Distro default for the first login user
        let existing = [AllocationRange::new(100000, 65536)];
        assert_eq!(
            first_fit(&existing, 200000, 65536),
            Some(AllocationRange::new(200000, 65536))
        );
        // Range straddling the floor pushes the candidate past it
        let straddling = [AllocationRange::new(150000, 100000)];
        assert_eq!(
            first_fit(&straddling, 200000, 10),
            Some(AllocationRange::new(250000, 10))
        );
    }

    #[test]
    fn test_first_fit_exhausted() {
        let existing = [AllocationRange::new(100000, u32::MAX - 100000)];
        assert_eq!(first_fit(&existing, 100000, 65536), None);
        assert_eq!(first_fit(&[], u32::MAX - 10, 65536), None);
    }

    #[test]
    fn test_ranges_never_overlap() {
        let mut allocated: Vec<AllocationRange> = vec![
            AllocationRange::new(100000, 1000),
            AllocationRange::new(170000, 5),
        ];
        for size in [65536, 10, 70000, 1, 65536] {
            let range = first_fit(&allocated, 100000, size).unwrap();
            assert!(allocated.iter().all(|r| !r.overlaps(&range)));
            allocated.push(range);
        }
    }

    #[test]
    fn test_allocate_uid_skips_used_uids_and_gids() {
        let system = FakeSystem::new();
        system.add_user("alice", 10000, "/home/alice", "/bin/bash");
        system.add_group("media", 10001);
        let paths = system.paths();
        let allocator = UidAllocator::new(&system, &paths);

        let uid = allocator.allocate_uid(&UserSettings::default()).unwrap();
        assert_eq!(uid, 10002);
    }

    #[test]
    fn test_allocate_uid_exhausted() {
        let system = FakeSystem::new();
        system.add_user("alice", 10000, "/home/alice", "/bin/bash");
        let paths = system.paths();
        let allocator = UidAllocator::new(&system, &paths);
        let users = UserSettings {
            uid_range_start: 10000,
            uid_range_end: 10000,
            ..UserSettings::default()
        };

        let err = allocator.allocate_uid(&users).unwrap_err();
        assert!(matches!(
            err,
            Error::UidRangeExhausted {
                start: 10000,
                end: 10000
            }
        ));
    }

    #[test]
    fn test_allocate_subuid_range_considers_both_files() {
        let system = FakeSystem::new();
        let paths = system.paths();
        fs::create_dir_all(paths.resolve("/etc")).unwrap();
        fs::write(paths.subuid(), "alice:100000:65536\n").unwrap();
        fs::write(paths.subgid(), "alice:100000:65536\nbob:165536:65536\n").unwrap();
        let allocator = UidAllocator::new(&system, &paths);

        let range = allocator
            .allocate_subuid_range(65536, &UserSettings::default())
            .unwrap();
        assert_eq!(range, AllocationRange::new(231072, 65536));
    }

    #[test]
    fn test_lookup_and_existing_range() {
        let system = FakeSystem::new();
        system.add_user("divban-caddy", 10000, "/srv/divban-caddy", "/usr/sbin/nologin");
        let paths = system.paths();
        fs::create_dir_all(paths.resolve("/etc")).unwrap();
        fs::write(paths.subuid(), "divban-caddy:100000:65536\n").unwrap();
        let allocator = UidAllocator::new(&system, &paths);

        assert_eq!(
            allocator.get_uid_by_username("divban-caddy").unwrap(),
            Some(10000)
        );
        assert!(!allocator.user_exists("divban-nope").unwrap());
        assert_eq!(
            allocator.get_existing_subuid_start("divban-caddy").unwrap(),
            Some(100000)
        );
        assert_eq!(allocator.get_existing_subuid_start("divban-nope").unwrap(), None);
    }

    #[test]
    fn test_nologin_shell_detection() {
        let system = FakeSystem::new();
        let paths = system.paths();
        let allocator = UidAllocator::new(&system, &paths);
        assert_eq!(allocator.get_nologin_shell(), FALLBACK_SHELL);

        fs::create_dir_all(paths.resolve("/sbin")).unwrap();
        fs::write(paths.resolve("/sbin/nologin"), "").unwrap();
        assert_eq!(allocator.get_nologin_shell(), "/sbin/nologin");
    }

    #[test]
    fn test_non_interactive_shells() {
        assert!(is_non_interactive_shell("/usr/sbin/nologin"));
        assert!(is_non_interactive_shell("/bin/false"));
        assert!(!is_non_interactive_shell("/bin/bash"));
    }
}
