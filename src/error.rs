// src/error.rs

//! Error types for divban
//!
//! Every error belongs to one of three families (see [`ErrorKind`]):
//! system failures (commands, I/O, exhausted ID ranges), general input
//! errors (bad service names, bad settings) and service errors (an account
//! that was expected to exist does not).

use std::path::PathBuf;
use thiserror::Error;

/// Result type for divban operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`] by origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// OS command, file I/O, lock or ID-space failure
    System,
    /// Invalid input (names, settings, malformed files)
    General,
    /// A named service or user was expected to exist and does not
    Service,
}

/// Errors produced by the provisioning core
#[derive(Error, Debug)]
pub enum Error {
    /// A command ran but exited unsuccessfully
    #[error("command `{command}` failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A command could not be started at all
    #[error("failed to run `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No free UID left in the configured range
    #[error("no free UID in range {start}-{end}")]
    UidRangeExhausted { start: u32, end: u32 },

    /// No room for another subordinate-ID block
    #[error("no room for a subordinate ID range of size {size} at or above {start}")]
    SubuidRangeExhausted { start: u32, size: u32 },

    /// Account creation kept racing another actor for the same UID
    #[error("UID allocation for '{username}' still conflicted after {attempts} attempts")]
    UidConflict { username: String, attempts: u32 },

    /// Acquiring or releasing a named lock failed
    #[error("lock '{name}': {message}")]
    Lock { name: String, message: String },

    /// Root privileges are needed before any state can change
    #[error("root privileges required: {0}")]
    RootRequired(String),

    /// A pre-existing account does not match what divban expects
    #[error("existing user '{username}' has {field} '{actual}', expected {expected}")]
    UserMismatch {
        username: String,
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// Service name cannot be used
    #[error("invalid service name '{name}': {reason}")]
    InvalidServiceName { name: String, reason: String },

    /// Username violates POSIX rules
    #[error("invalid username '{0}'")]
    InvalidUsername(String),

    /// Settings failed validation
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// TOML parse failure
    #[error("failed to parse {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A line in a system database could not be parsed
    #[error("malformed entry in {source_name}: {line}")]
    MalformedEntry { source_name: String, line: String },

    /// The service user does not exist
    #[error("user '{0}' does not exist")]
    UserNotFound(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Which family this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandFailed { .. }
            | Self::CommandSpawn { .. }
            | Self::Io { .. }
            | Self::UidRangeExhausted { .. }
            | Self::SubuidRangeExhausted { .. }
            | Self::UidConflict { .. }
            | Self::Lock { .. }
            | Self::RootRequired(_)
            | Self::UserMismatch { .. } => ErrorKind::System,
            Self::InvalidServiceName { .. }
            | Self::InvalidUsername(_)
            | Self::InvalidSettings(_)
            | Self::Config { .. }
            | Self::MalformedEntry { .. } => ErrorKind::General,
            Self::UserNotFound(_) => ErrorKind::Service,
        }
    }
}
