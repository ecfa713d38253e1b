//! `rcl`: command-line entry point for the reconcile engine.
//!
//! Parses CLI arguments, installs tracing, opens the configured state
//! store, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use reconcile_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands, StateCommand};
use state::AppState;

fn default_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "info,reconcile_core=debug,reconcile_infra=debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        format: if cli.json { LogFormat::Json } else { LogFormat::Pretty },
        default_filter: default_filter(cli.verbose, cli.quiet).to_string(),
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "rcl", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(&cli.config).await?;

    let result = match cli.command {
        Commands::Validate { file } => cli::plan::validate(&state, &file, cli.json).await,
        Commands::Plan { file } => cli::plan::plan(&state, &file, cli.json).await,
        Commands::Apply { file } => cli::apply::apply(&state, &file, cli.json, cli.quiet).await,
        Commands::Destroy { yes } => cli::apply::destroy(&state, yes, cli.json, cli.quiet).await,
        Commands::State { action } => match action {
            StateCommand::List => cli::state::list_records(&state, cli.json).await,
            StateCommand::Show { node_id } => cli::state::show_record(&state, &node_id, cli.json).await,
        },
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
