//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stackwright - Declarative infrastructure reconciliation.
#[derive(Parser, Debug)]
#[command(name = "stackwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Manifest file or directory. Repeat to load several; defaults to
    /// `stackwright.yaml` found in the current directory or a parent.
    #[arg(
        short,
        long = "file",
        global = true,
        env = "STACKWRIGHT_FILE",
        value_delimiter = ','
    )]
    pub files: Vec<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

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
    /// Write a starter manifest.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Load the manifest and build the dependency graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print the resources in execution order with their dependencies.
    Graph,

    /// Show what apply would change.
    Plan {
        /// Check recorded resources against the provider first.
        #[arg(long)]
        refresh: bool,

        /// Show field-level changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Reconcile the stack towards the manifest.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Check recorded resources against the provider first.
        #[arg(long)]
        refresh: bool,

        /// Maximum provider calls in flight.
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Delete every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Maximum provider calls in flight.
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Check recorded resources against the provider without changing anything.
    Drift,

    /// Print stack outputs from the last apply.
    Outputs,

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// List recorded resources.
    List,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

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
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_with_files() {
        let cli = Cli::try_parse_from([
            "stackwright",
            "-f",
            "network.yaml",
            "-f",
            "services/",
            "apply",
            "--yes",
            "--parallelism",
            "8",
        ])
        .unwrap();

        assert_eq!(
            cli.files,
            vec![PathBuf::from("network.yaml"), PathBuf::from("services/")]
        );
        match cli.command {
            Commands::Apply {
                yes,
                refresh,
                parallelism,
            } => {
                assert!(yes);
                assert!(!refresh);
                assert_eq!(parallelism, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_state_unlock() {
        let cli = Cli::try_parse_from(["stackwright", "--output", "json", "state", "unlock", "--force"])
            .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { force: true, lock_id: None }
            }
        ));
    }
}
