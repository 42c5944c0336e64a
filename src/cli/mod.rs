// src/cli/mod.rs
//! CLI definitions for divban
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `setup` - Provision a service user and its home
//! - `remove` - Remove a service user and everything registered for it
//! - `show` - Print the provisioned identity of a service
//! - `completions` - Generate shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use divban::settings::DEFAULT_SETTINGS_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "divban")]
#[command(version)]
#[command(about = "Rootless per-service users for containerized services", long_about = None)]
pub struct Cli {
    /// Path to the divban settings file
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision the user, directories and configuration of a service
    Setup {
        /// Service name (e.g. caddy)
        service: String,

        /// Service configuration file (TOML)
        config: PathBuf,
    },

    /// Remove a service user, its home and its subordinate IDs
    Remove {
        /// Service name
        service: String,
    },

    /// Show the provisioned identity of a service
    Show {
        /// Service name
        service: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}
