// src/commands/mod.rs
//! Command handlers for the divban CLI

mod completions;
mod remove;
mod setup;
mod show;

pub use completions::cmd_completions;
pub use remove::cmd_remove;
pub use setup::cmd_setup;
pub use show::cmd_show;
