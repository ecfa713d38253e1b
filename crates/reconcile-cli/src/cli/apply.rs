//! `rcl apply` and `rcl destroy`.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use reconcile_core::engine::{Orchestrator, OrchestratorError};
use reconcile_infra::declarations::load_declarations;
use reconcile_infra::state::AnyStateStore;
use reconcile_types::run::RunReport;

use super::render;
use crate::state::AppState;

/// Cancel the run on Ctrl+C. In-flight provider calls finish; nothing new
/// is dispatched.
fn cancel_on_ctrl_c(orchestrator: &Orchestrator<AnyStateStore>) -> tokio::task::JoinHandle<()> {
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n  {} Cancelling: waiting for in-flight operations...",
                style("!").yellow().bold()
            );
            token.cancel();
        }
    })
}

fn show(report: &RunReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if !quiet {
        render::print_report(report);
    }
    Ok(())
}

/// Print the run's outcome and turn anything short of a clean run into an
/// error. An aborted run still shows what every node reached.
fn finish(result: Result<RunReport, OrchestratorError>, json: bool, quiet: bool) -> Result<()> {
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(report) = err.report() {
                show(report, json, quiet)?;
            }
            return Err(err.into());
        }
    };
    show(&report, json, quiet)?;

    if !report.is_success() {
        bail!(
            "{} node(s) failed, {} skipped",
            report.summary.failed,
            report.summary.skipped
        );
    }
    Ok(())
}

/// Plan and apply a declaration file.
pub async fn apply(state: &AppState, file: &Path, json: bool, quiet: bool) -> Result<()> {
    let declarations = load_declarations(file).await?;
    let orchestrator = state.orchestrator();

    let watcher = cancel_on_ctrl_c(&orchestrator);
    let result = orchestrator.run(declarations).await;
    watcher.abort();

    finish(result, json, quiet)
}

/// Delete everything recorded in state. Without `yes`, only shows the plan.
pub async fn destroy(state: &AppState, yes: bool, json: bool, quiet: bool) -> Result<()> {
    let orchestrator = state.orchestrator();

    if !yes {
        let plan = orchestrator.plan(Vec::new()).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            render::print_plan(&plan, false);
            if plan.has_changes() {
                println!(
                    "  {} Re-run with {} to delete these resources.",
                    style("i").blue().bold(),
                    style("--yes").yellow()
                );
                println!();
            }
        }
        return Ok(());
    }

    let watcher = cancel_on_ctrl_c(&orchestrator);
    let result = orchestrator.destroy().await;
    watcher.abort();

    finish(result, json, quiet)
}
