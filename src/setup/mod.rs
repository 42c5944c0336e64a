// src/setup/mod.rs

//! Setup saga interpreter
//!
//! A setup is an ordered list of [`SetupStep`]s. Each step has an
//! `acquire` action that returns a partial update to the shared state and
//! an optional `release` action that compensates for it.
//!
//! Execution rules:
//!
//! - Steps acquire strictly in order. Step N is announced to the progress
//!   reporter as "N of total" before it runs.
//! - When a step fails, the releases of every step that already completed
//!   run in reverse order with [`SagaOutcome::Failure`]. The failing step
//!   and everything after it never run any action.
//! - When every step succeeds, releases still run in reverse order, with
//!   [`SagaOutcome::Success`], so steps can drop temporary artifacts such
//!   as a kept backup.
//! - A release receives the state as it was right after its own step
//!   completed. Release errors are reported and logged; the caller always
//!   sees the error that triggered the rollback.
//!
//! The interpreter knows nothing about users or files, see `steps` for the
//! concrete provisioning saga.

pub mod steps;

pub use steps::{
    ConfigInstall, ProvisionContext, ProvisionState, check_privileges, provision_service,
};

use crate::error::Result;
use crate::progress::SetupProgress;
use tracing::{debug, warn};

/// State threaded through a saga
pub trait StepState: Default + Clone {
    /// Partial update produced by one step
    type Update;

    fn merge(&mut self, update: Self::Update);
}

/// How the saga as a whole ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    Success,
    Failure,
}

impl SagaOutcome {
    pub fn is_failure(self) -> bool {
        self == Self::Failure
    }
}

type AcquireFn<'a, S> = Box<dyn FnOnce(&S) -> Result<<S as StepState>::Update> + 'a>;
type ReleaseFn<'a, S> = Box<dyn FnOnce(&S, SagaOutcome) -> Result<()> + 'a>;

/// One unit of a setup saga
pub struct SetupStep<'a, S: StepState> {
    message: String,
    acquire: AcquireFn<'a, S>,
    release: Option<ReleaseFn<'a, S>>,
}

impl<'a, S: StepState> SetupStep<'a, S> {
    /// A step with no compensation
    ///
    /// `acquire` sees the state accumulated by the steps before it.
    pub fn new<F>(message: impl Into<String>, acquire: F) -> Self
    where
        F: FnOnce(&S) -> Result<S::Update> + 'a,
    {
        Self {
            message: message.into(),
            acquire: Box::new(acquire),
            release: None,
        }
    }

    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce(&S, SagaOutcome) -> Result<()> + 'a,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A step whose acquisition finished, with the state snapshot it produced
struct Completed<'a, S: StepState> {
    message: String,
    release: Option<ReleaseFn<'a, S>>,
    snapshot: S,
}

/// Run `steps` in order, compensating completed steps if one fails
///
/// Returns the final accumulated state, or the error of the failing step.
pub fn run_setup_saga<S: StepState>(
    steps: Vec<SetupStep<'_, S>>,
    progress: &dyn SetupProgress,
) -> Result<S> {
    let total = steps.len();
    let mut state = S::default();
    let mut completed: Vec<Completed<'_, S>> = Vec::with_capacity(total);

    for (i, step) in steps.into_iter().enumerate() {
        let index = i + 1;
        progress.step_started(index, total, &step.message);

        match (step.acquire)(&state) {
            Ok(update) => {
                state.merge(update);
                completed.push(Completed {
                    message: step.message,
                    release: step.release,
                    snapshot: state.clone(),
                });
            }
            Err(e) => {
                progress.step_failed(index, total, &step.message, &e);
                progress.rollback_started(completed.len());
                release_all(completed, SagaOutcome::Failure, progress);
                return Err(e);
            }
        }
    }

    release_all(completed, SagaOutcome::Success, progress);
    progress.finished(total);
    Ok(state)
}

/// Run releases, most recently acquired first
fn release_all<S: StepState>(
    completed: Vec<Completed<'_, S>>,
    outcome: SagaOutcome,
    progress: &dyn SetupProgress,
) {
    for step in completed.into_iter().rev() {
        let Some(release) = step.release else {
            continue;
        };
        debug!("Releasing '{}' ({:?})", step.message, outcome);
        if let Err(e) = release(&step.snapshot, outcome) {
            warn!("Release of '{}' failed: {}", step.message, e);
            progress.release_failed(&step.message, &e);
        }
    }
}
