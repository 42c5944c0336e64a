// src/filesystem.rs

//! Filesystem primitives used by the provisioning steps
//!
//! Registry and config files are only ever replaced atomically: the new
//! content is written to a temp file in the same directory, synced, and
//! renamed over the target, so readers see either the old or the new file.

use crate::error::{Error, Result};
use crate::process::{CommandRunner, ExecOptions};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

/// Read a text file, treating a missing file as empty
pub fn read_file_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replace `path` with `contents` via write-to-temp-then-rename
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".divban-")
        .tempfile_in(parent)
        .map_err(|e| Error::io(parent, e))?;

    tmp.write_all(contents).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;

    // Persist the rename itself; not every filesystem supports fsync on directories
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    debug!("Atomically replaced {}", path.display());
    Ok(())
}

/// Give `path` to `uid:gid`
///
/// Goes through the command runner like every other privileged operation.
pub fn chown_path(runner: &dyn CommandRunner, path: &Path, uid: u32, gid: u32) -> Result<()> {
    let owner = format!("{}:{}", uid, gid);
    let path_str = path.to_string_lossy();
    runner.exec_success(&["chown", &owner, &path_str], &ExecOptions::new())?;
    Ok(())
}

/// Set permission bits on `path`
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}
