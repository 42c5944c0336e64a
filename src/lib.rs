// src/lib.rs

//! divban provisioning core
//!
//! Sets up rootless, per-service OS users that run their containers under
//! systemd, and tears them down again.
//!
//! # Architecture
//!
//! - OS-backed state: the user database and `/etc/subuid`/`/etc/subgid`
//!   are re-read for every decision, nothing is cached or persisted
//! - Locked allocation: UID choice plus `useradd`, and every registry edit,
//!   run inside named `flock` critical sections
//! - Saga setup: provisioning is an ordered list of acquire/release steps
//!   with reverse-order compensation on failure
//! - `was_created` tagging: rollback only ever undoes what the current run
//!   created

pub mod error;
pub mod filesystem;
pub mod lock;
pub mod paths;
pub mod process;
pub mod progress;
pub mod service;
pub mod settings;
pub mod setup;
pub mod system;
pub mod user;

#[cfg(test)]
mod test_support;

pub use error::{Error, ErrorKind, Result};
pub use lock::{LockManager, SUBID_CONFIG_LOCK, UID_ALLOCATION_LOCK};
pub use paths::SystemPaths;
pub use process::{CommandOutput, CommandRunner, ExecOptions, SystemRunner};
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, SetupProgress, SilentProgress};
pub use service::{NoopSetup, ServiceDefinition, ServiceSetup, ServiceSetupContext};
pub use settings::Settings;
pub use setup::{
    ConfigInstall, ProvisionContext, ProvisionState, SagaOutcome, SetupStep, StepState,
    check_privileges, provision_service, run_setup_saga,
};
pub use user::{Acquired, AllocationRange, ServiceUser, UidAllocator, UserManager};
