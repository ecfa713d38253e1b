//! `rcl state list` and `rcl state show`.

use anyhow::{Result, anyhow};
use console::style;
use reconcile_core::repository::StateStore;

use super::render;
use crate::state::AppState;

pub async fn list_records(state: &AppState, json: bool) -> Result<()> {
    let records = state.store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!(
            "  {} No resources recorded in {}. Create some with: {}",
            style("i").blue().bold(),
            style(state.state_location().display()).dim(),
            style("rcl apply <file>").yellow()
        );
        println!();
        return Ok(());
    }

    render::print_records(&records);

    let pending = state.store.pending_intents().await?;
    if !pending.is_empty() {
        println!(
            "  {} {} interrupted operation(s) will be reconciled on the next run: {}",
            style("!").yellow().bold(),
            pending.len(),
            pending
                .iter()
                .map(|i| format!("{} ({})", i.node_id, i.operation))
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!();
    }
    Ok(())
}

pub async fn show_record(state: &AppState, node_id: &str, json: bool) -> Result<()> {
    let record = state
        .store
        .load(node_id)
        .await?
        .ok_or_else(|| anyhow!("no state recorded for '{node_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!();
    println!("  {} ({})", style(&record.node_id).cyan().bold(), record.resource_type);
    println!("  Identity: {}", style(&record.identity).bold());
    println!("  Serial:   {}", record.serial);
    println!("  Updated:  {}", record.updated_at.to_rfc3339());
    if !record.dependencies.is_empty() {
        println!("  Depends:  {}", record.dependencies.join(", "));
    }

    println!();
    println!("  {}", style("── Attributes ──").dim());
    for (key, value) in &record.attributes {
        println!("  {key} = {}", value.to_json());
    }

    if !record.outputs.is_empty() {
        println!();
        println!("  {}", style("── Outputs ──").dim());
        for (key, value) in &record.outputs {
            println!("  {key} = {value}");
        }
    }
    println!();
    Ok(())
}
