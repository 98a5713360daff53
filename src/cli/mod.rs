//! CLI module for the landing zone provisioner.
//!
//! This module provides the command-line interface for planning and applying
//! landing zone configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, LedgerCommands, OutputFormat};
pub use output::{MessageKind, OutputFormatter};
