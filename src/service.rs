// src/service.rs

//! Service definitions
//!
//! The provisioning core only needs a few facts about a service: its name,
//! whether it binds privileged ports, and which extra directories live in
//! its home. Everything service-specific beyond that (container
//! definitions, unit files) is produced by a [`ServiceSetup`]
//! implementation that runs as the last setup step.

use crate::error::Result;
use crate::process::CommandRunner;
use crate::user::{ServiceUser, validate_service_name};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Services whose containers publish ports 80/443 directly
const PRIVILEGED_PORT_SERVICES: &[&str] = &["caddy"];

/// What the provisioning core knows about one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    /// Needs `net.ipv4.ip_unprivileged_port_start <= 80`
    pub needs_privileged_ports: bool,
    /// Extra directories, relative to the service home
    pub data_dirs: Vec<PathBuf>,
}

impl ServiceDefinition {
    /// Look up the definition for `name`
    ///
    /// Unknown but well-formed names get a plain definition.
    pub fn for_service(name: &str) -> Result<Self> {
        validate_service_name(name)?;
        let data_dirs = match name {
            "caddy" => vec![PathBuf::from("data/caddy"), PathBuf::from("data/config")],
            _ => Vec::new(),
        };
        Ok(Self {
            name: name.to_string(),
            needs_privileged_ports: PRIVILEGED_PORT_SERVICES.contains(&name),
            data_dirs,
        })
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dirs.push(dir.into());
        self
    }
}

/// Everything a service-specific setup callback may use
pub struct ServiceSetupContext<'a> {
    pub service: &'a ServiceDefinition,
    pub user: &'a ServiceUser,
    /// Installed copy of the service configuration
    pub config_path: &'a Path,
    pub runner: &'a dyn CommandRunner,
}

/// Service-specific final setup step
///
/// There is no generic rollback for this step; an implementation cleans
/// up its own partial effects before returning an error.
pub trait ServiceSetup {
    fn setup(&self, ctx: &ServiceSetupContext<'_>) -> Result<()>;
}

/// Setup that does nothing beyond the generic steps
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSetup;

impl ServiceSetup for NoopSetup {
    fn setup(&self, ctx: &ServiceSetupContext<'_>) -> Result<()> {
        debug!("No service-specific setup for '{}'", ctx.service.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caddy_needs_privileged_ports() {
        let caddy = ServiceDefinition::for_service("caddy").unwrap();
        assert!(caddy.needs_privileged_ports);
        assert!(!caddy.data_dirs.is_empty());

        let immich = ServiceDefinition::for_service("immich").unwrap();
        assert!(!immich.needs_privileged_ports);
        assert!(immich.data_dirs.is_empty());
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(ServiceDefinition::for_service("Caddy").is_err());
        assert!(ServiceDefinition::for_service("../etc").is_err());
    }
}
