// src/process.rs

//! Process execution
//!
//! Every OS command divban runs (`getent`, `useradd`, `userdel`, `loginctl`,
//! `chown`, `sysctl`) goes through the [`CommandRunner`] trait so the
//! provisioning logic stays decoupled from the host and can be exercised
//! against a fake user database in tests.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Options for a single command invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

/// Runs OS commands and captures their output
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion. A non-zero exit is not an error here.
    fn exec(&self, argv: &[&str], opts: &ExecOptions) -> Result<CommandOutput>;

    /// Run `argv` and fail unless it exits with status 0
    fn exec_success(&self, argv: &[&str], opts: &ExecOptions) -> Result<CommandOutput> {
        let output = self.exec(argv, opts)?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                command: argv.join(" "),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the host with `std::process::Command`
///
/// stdin is nulled so a prompting tool can never hang a provisioning run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn exec(&self, argv: &[&str], opts: &ExecOptions) -> Result<CommandOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::CommandSpawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        })?;

        debug!("Running: {}", argv.join(" "));

        let output = Command::new(program)
            .args(args)
            .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::CommandSpawn {
                command: argv.join(" "),
                source,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
