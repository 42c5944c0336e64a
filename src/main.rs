// src/main.rs

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use divban::Settings;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return commands::cmd_completions(shell);
    }

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;

    match cli.command {
        Commands::Setup { service, config } => commands::cmd_setup(&settings, &service, &config),
        Commands::Remove { service } => commands::cmd_remove(&settings, &service),
        Commands::Show { service, json } => commands::cmd_show(&settings, &service, json),
        Commands::Completions { .. } => Ok(()),
    }
}
