//! CLI command definitions for the `rcl` binary.
//!
//! Uses clap derive macros. Commands follow the plan/apply workflow:
//! `rcl plan infra.yaml`, `rcl apply infra.yaml`, `rcl state list`.

pub mod apply;
pub mod plan;
pub mod render;
pub mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Reconcile declared infrastructure and run pipeline jobs.
#[derive(Parser)]
#[command(name = "rcl", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "RECONCILE_CONFIG", default_value = "reconcile.toml")]
    pub config: PathBuf,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a declaration file: references, cycles and plugin names.
    Validate {
        /// Declaration file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Show what apply would change, without changing anything.
    Plan {
        /// Declaration file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Bring real infrastructure in line with the declaration file.
    Apply {
        /// Declaration file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Delete every resource recorded in state.
    Destroy {
        /// Proceed without printing the plan first and stopping.
        #[arg(long)]
        yes: bool,
    },

    /// Inspect recorded state.
    State {
        #[command(subcommand)]
        action: StateCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List every recorded resource.
    #[command(alias = "ls")]
    List,

    /// Show one record with attributes and outputs.
    Show {
        /// Node ID.
        node_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["rcl", "plan", "infra.yaml", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Plan { .. }));
    }

    #[test]
    fn test_state_show_requires_node() {
        assert!(Cli::try_parse_from(["rcl", "state", "show"]).is_err());
        let cli = Cli::try_parse_from(["rcl", "state", "show", "web"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::State {
                action: StateCommand::Show { ref node_id }
            } if node_id == "web"
        ));
    }
}
