// src/user/subid.rs

//! Subordinate-ID registry editing
//!
//! `/etc/subuid` and `/etc/subgid` hold one `name:start:count` line per
//! delegated block. Edits always read the whole file, compute the new
//! content, and replace the file atomically. Comments and blank lines are
//! carried through untouched. Adding an entry that is already present or
//! removing one that is missing leaves the file alone.

use super::allocator::AllocationRange;
use crate::error::{Error, Result};
use crate::filesystem::{atomic_write, read_file_or_empty};
use crate::lock::{LockManager, SUBID_CONFIG_LOCK};
use crate::paths::SystemPaths;
use std::path::Path;
use tracing::{debug, info};

/// Registry files are world-readable, root-writable
const REGISTRY_MODE: u32 = 0o644;

/// One delegated block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubidEntry {
    pub name: String,
    pub range: AllocationRange,
}

impl SubidEntry {
    pub fn new(name: &str, range: AllocationRange) -> Self {
        Self {
            name: name.to_string(),
            range,
        }
    }

    fn render(&self) -> String {
        format!("{}:{}:{}", self.name, self.range.start, self.range.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry(SubidEntry),
    /// Comment or blank line, preserved verbatim
    Other(String),
}

/// Parsed contents of one registry file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubidFile {
    lines: Vec<Line>,
}

impl SubidFile {
    /// Parse registry text; `origin` names the file in errors
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let lines = content
            .lines()
            .map(|raw| {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return Ok(Line::Other(raw.to_string()));
                }
                parse_entry(trimmed)
                    .map(Line::Entry)
                    .ok_or_else(|| Error::MalformedEntry {
                        source_name: origin.to_string(),
                        line: raw.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { lines })
    }

    pub fn entries(&self) -> impl Iterator<Item = &SubidEntry> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry),
            Line::Other(_) => None,
        })
    }

    pub fn into_entries(self) -> Vec<SubidEntry> {
        self.lines
            .into_iter()
            .filter_map(|line| match line {
                Line::Entry(entry) => Some(entry),
                Line::Other(_) => None,
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&SubidEntry> {
        self.entries().find(|entry| entry.name == name)
    }

    /// Make `entry` the only block registered for its name
    ///
    /// Returns `false` when the file already says exactly that.
    pub fn set_entry(&mut self, entry: SubidEntry) -> bool {
        let unchanged = {
            let mut owned = self.entries().filter(|e| e.name == entry.name);
            owned.next() == Some(&entry) && owned.next().is_none()
        };
        if unchanged {
            return false;
        }
        self.remove(&entry.name);
        self.lines.push(Line::Entry(entry));
        true
    }

    /// Drop every block registered for `name`; `false` if there were none
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Entry(entry) if entry.name == name));
        self.lines.len() != before
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry(entry) => out.push_str(&entry.render()),
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

fn parse_entry(line: &str) -> Option<SubidEntry> {
    let mut parts = line.split(':');
    let name = parts.next()?.trim();
    let start = parts.next()?.trim().parse().ok()?;
    let size = parts.next()?.trim().parse().ok()?;
    if name.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(SubidEntry::new(name, AllocationRange::new(start, size)))
}

/// Read and parse a registry file; a missing file is an empty registry
pub fn read_registry(path: &Path) -> Result<SubidFile> {
    let content = read_file_or_empty(path)?;
    SubidFile::parse(&content, &path.display().to_string())
}

fn edit_registry(path: &Path, edit: impl FnOnce(&mut SubidFile) -> bool) -> Result<bool> {
    let mut registry = read_registry(path)?;
    if !edit(&mut registry) {
        return Ok(false);
    }
    atomic_write(path, registry.render().as_bytes(), REGISTRY_MODE)?;
    Ok(true)
}

/// Register `range` for `username` in both registry files
///
/// Caller must hold the subid-config lock.
pub fn write_entries(paths: &SystemPaths, username: &str, range: AllocationRange) -> Result<()> {
    for path in [paths.subuid(), paths.subgid()] {
        let entry = SubidEntry::new(username, range);
        if edit_registry(&path, |registry| registry.set_entry(entry))? {
            info!(
                "Registered {}:{}:{} in {}",
                username,
                range.start,
                range.size,
                path.display()
            );
        } else {
            debug!("{} already registered in {}", username, path.display());
        }
    }
    Ok(())
}

/// Remove `username` from both registry files; `true` if anything changed
///
/// Caller must hold the subid-config lock.
pub fn remove_entries(paths: &SystemPaths, username: &str) -> Result<bool> {
    let mut changed = false;
    for path in [paths.subuid(), paths.subgid()] {
        if edit_registry(&path, |registry| registry.remove(username))? {
            info!("Removed {} from {}", username, path.display());
            changed = true;
        }
    }
    Ok(changed)
}

/// [`remove_entries`] under the subid-config lock
pub fn remove_entries_locked(
    locks: &LockManager,
    paths: &SystemPaths,
    username: &str,
) -> Result<bool> {
    locks.with_lock(SUBID_CONFIG_LOCK, || remove_entries(paths, username))
}
