//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Landing zone provisioner - dependency-aware Azure subscription vending.
#[derive(Parser, Debug)]
#[command(name = "landing-zone")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the root configuration file.
    #[arg(short, long, global = true, env = "LANDING_ZONE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter configuration.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Build and display the execution plan.
    Plan {
        /// List every node with its dependencies.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Apply the execution plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Apply against an in-memory cloud instead of Azure.
        #[arg(long)]
        simulate: bool,

        /// Override the per-batch concurrency limit.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Inspect or unlock the run ledger.
    Ledger {
        /// Ledger subcommand.
        #[command(subcommand)]
        command: LedgerCommands,
    },
}

/// Ledger subcommands.
#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Show the last run's ledger.
    Show {
        /// Include earlier runs.
        #[arg(long)]
        history: bool,
    },

    /// Release the ledger lock.
    Unlock {
        /// Release the lock only if this run still holds it.
        #[arg(long)]
        run_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from([
            "landing-zone",
            "--config",
            "lz.yaml",
            "apply",
            "--yes",
            "--simulate",
            "--concurrency",
            "2",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("lz.yaml")));
        match cli.command {
            Commands::Apply {
                yes,
                simulate,
                concurrency,
            } => {
                assert!(yes);
                assert!(simulate);
                assert_eq!(concurrency, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ledger_unlock() {
        let cli = Cli::parse_from(["landing-zone", "--output", "json", "ledger", "unlock", "--force"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Ledger {
                command: LedgerCommands::Unlock { force: true, .. }
            }
        ));
    }
}
