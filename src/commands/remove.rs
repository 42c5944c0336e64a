// src/commands/remove.rs
//! Service removal command

use anyhow::{Context, Result};
use divban::settings::Settings;
use divban::system::disable_linger;
use divban::user::username_for_service;
use divban::{SystemRunner, UserManager};
use tracing::info;

/// Remove the user of `service`, its home and its subordinate IDs
///
/// Safe to run repeatedly; a service that is already gone is not an error.
pub fn cmd_remove(settings: &Settings, service: &str) -> Result<()> {
    let username = username_for_service(service)?;
    let runner = SystemRunner::new();
    let users = UserManager::new(&runner, settings);

    info!("Removing service '{}'", service);
    disable_linger(&runner, &settings.system_paths(), &username)
        .with_context(|| format!("Failed to disable linger for '{}'", username))?;

    let deleted = users
        .delete_service_user(service)
        .with_context(|| format!("Failed to remove user '{}'", username))?;

    if deleted {
        println!("Removed {} (user {})", service, username);
    } else {
        println!("{} is not provisioned, nothing to remove", service);
    }
    Ok(())
}
