// src/progress.rs

//! Progress reporting for the setup saga
//!
//! The saga interpreter announces each step as "step N of total" before it
//! runs and reports failures and rollback. Implementations:
//! - `LogProgress`: reports through tracing
//! - `SilentProgress`: no-op for scripted/quiet modes and tests
//! - `CallbackProgress`: forwards [`ProgressEvent`]s to a closure
//!
//! # Example
//!
//! ```ignore
//! use divban::progress::LogProgress;
//! use divban::setup::run_setup_saga;
//!
//! let progress = LogProgress::new("caddy");
//! run_setup_saga(steps, &progress)?;
//! ```

use crate::error::Error;
use tracing::{error, info, warn};

/// Receives saga lifecycle notifications
pub trait SetupProgress {
    /// Step `index` (1-based) of `total` is about to run
    fn step_started(&self, index: usize, total: usize, message: &str);

    /// Step `index` failed; rollback of earlier steps follows
    fn step_failed(&self, index: usize, total: usize, message: &str, err: &Error);

    /// Compensation of `completed` steps is starting
    fn rollback_started(&self, completed: usize);

    /// A release action failed (logged, never propagated)
    fn release_failed(&self, message: &str, err: &Error);

    /// All `total` steps succeeded
    fn finished(&self, total: usize);
}

/// Silent progress reporter (no-op)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self
    }
}

impl SetupProgress for SilentProgress {
    fn step_started(&self, _index: usize, _total: usize, _message: &str) {}
    fn step_failed(&self, _index: usize, _total: usize, _message: &str, _err: &Error) {}
    fn rollback_started(&self, _completed: usize) {}
    fn release_failed(&self, _message: &str, _err: &Error) {}
    fn finished(&self, _total: usize) {}
}

/// Logging progress reporter
///
/// Logs step transitions to tracing, prefixed with a name (usually the
/// service being set up).
#[derive(Debug, Clone)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SetupProgress for LogProgress {
    fn step_started(&self, index: usize, total: usize, message: &str) {
        info!("{}: [{}/{}] {}", self.name, index, total, message);
    }

    fn step_failed(&self, index: usize, total: usize, message: &str, err: &Error) {
        error!(
            "{}: step {}/{} '{}' failed: {}",
            self.name, index, total, message, err
        );
    }

    fn rollback_started(&self, completed: usize) {
        if completed > 0 {
            warn!("{}: rolling back {} completed step(s)", self.name, completed);
        }
    }

    fn release_failed(&self, message: &str, err: &Error) {
        warn!("{}: cleanup of '{}' failed: {}", self.name, message, err);
    }

    fn finished(&self, total: usize) {
        info!("{}: setup complete ({} steps)", self.name, total);
    }
}

/// Events emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StepStarted {
        index: usize,
        total: usize,
        message: String,
    },
    StepFailed {
        index: usize,
        message: String,
        error: String,
    },
    RollbackStarted {
        completed: usize,
    },
    ReleaseFailed {
        message: String,
        error: String,
    },
    Finished {
        total: usize,
    },
}

/// Callback-based progress reporter
///
/// Calls a user-provided function for every event. Useful for custom
/// front ends and for asserting on the event stream in tests.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> SetupProgress for CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    fn step_started(&self, index: usize, total: usize, message: &str) {
        (self.callback)(ProgressEvent::StepStarted {
            index,
            total,
            message: message.to_string(),
        });
    }

    fn step_failed(&self, index: usize, _total: usize, message: &str, err: &Error) {
        (self.callback)(ProgressEvent::StepFailed {
            index,
            message: message.to_string(),
            error: err.to_string(),
        });
    }

    fn rollback_started(&self, completed: usize) {
        (self.callback)(ProgressEvent::RollbackStarted { completed });
    }

    fn release_failed(&self, message: &str, err: &Error) {
        (self.callback)(ProgressEvent::ReleaseFailed {
            message: message.to_string(),
            error: err.to_string(),
        });
    }

    fn finished(&self, total: usize) {
        (self.callback)(ProgressEvent::Finished { total });
    }
}
