// src/system/mod.rs

//! Host-level settings a service user depends on
//!
//! - `linger`: keeps the user's systemd instance running without a login
//! - `sysctl`: lets unprivileged users bind low ports

pub mod linger;
pub mod sysctl;

pub use linger::{disable_linger, enable_linger, linger_enabled};
pub use sysctl::{ensure_unprivileged_ports, unprivileged_ports_configured};
