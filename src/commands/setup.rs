// src/commands/setup.rs
//! Service provisioning command

use anyhow::{Context, Result};
use divban::settings::Settings;
use divban::{
    LogProgress, ProvisionContext, ServiceDefinition, SystemRunner, check_privileges,
    provision_service,
};
use std::path::Path;
use tracing::info;

/// Check that the service configuration is well-formed TOML
///
/// The schema belongs to the service; at this point it only has to parse.
pub fn validate_config(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
}

/// Provision `service` with the configuration at `config`
pub fn cmd_setup(settings: &Settings, service: &str, config: &Path) -> Result<()> {
    let definition = ServiceDefinition::for_service(service)?;
    validate_config(config)?;

    let runner = SystemRunner::new();
    let ctx = ProvisionContext::new(&runner, settings, &definition, config);
    check_privileges(&ctx)?;

    info!("Setting up service '{}'", service);
    let progress = LogProgress::new(service);
    let state = provision_service(&ctx, &progress)
        .with_context(|| format!("Setup of '{}' failed", service))?;

    if let Some(user) = state.service_user() {
        println!(
            "{} is ready: user {} (uid {}), home {}",
            service,
            user.username,
            user.uid,
            user.home_dir.display()
        );
    }
    if let Some(config) = &state.config {
        println!("Configuration installed at {}", config.target.display());
    }
    Ok(())
}
