// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use divban::{CommandOutput, CommandRunner, ExecOptions, Settings, SystemPaths};
use std::sync::Mutex;
use tempfile::TempDir;

/// Scratch system root with settings pointing into it.
///
/// Keep the value alive for as long as the paths are used.
pub struct TestRoot {
    pub temp_dir: TempDir,
    pub settings: Settings,
}

impl TestRoot {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths.root = temp_dir.path().to_path_buf();
        settings.paths.lock_dir = temp_dir.path().join("run/lock/divban");
        settings.users.home_base = temp_dir.path().join("srv");
        Self { temp_dir, settings }
    }

    pub fn paths(&self) -> SystemPaths {
        self.settings.system_paths()
    }
}

/// Runner that records every command and reports success.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn exec(&self, argv: &[&str], _opts: &ExecOptions) -> divban::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        Ok(CommandOutput::ok(""))
    }
}
