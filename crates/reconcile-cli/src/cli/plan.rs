//! `rcl validate` and `rcl plan`.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use reconcile_core::engine::{Graph, schedule};
use reconcile_core::provider::ProviderRegistry;
use reconcile_infra::declarations::load_declarations;
use reconcile_types::node::{Declaration, NodeKind};

use super::render;
use crate::state::AppState;

/// Declarations whose `type` names no registered provider or runner.
fn unknown_plugins<'a>(declarations: &'a [Declaration], registry: &ProviderRegistry) -> Vec<&'a Declaration> {
    declarations
        .iter()
        .filter(|d| match d.kind {
            NodeKind::Resource => registry.provider(&d.node_type).is_none(),
            NodeKind::Job => registry.runner(&d.node_type).is_none(),
        })
        .collect()
}

fn plugin_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Resource => "provider",
        NodeKind::Job => "runner",
    }
}

/// Check a declaration file without touching state.
pub async fn validate(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let declarations = load_declarations(file).await?;
    let unknown: Vec<String> = unknown_plugins(&declarations, &state.registry)
        .iter()
        .map(|d| format!("{} ({} '{}')", d.id, plugin_label(d.kind), d.node_type))
        .collect();

    let graph = Graph::build(declarations)?;
    let waves = schedule(&graph)?;

    if json {
        let out = serde_json::json!({
            "valid": unknown.is_empty(),
            "nodes": graph.len(),
            "waves": waves,
            "unknown_plugins": unknown,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} {} nodes in {} waves",
            style("✓").green().bold(),
            graph.len(),
            waves.len()
        );
        for (i, wave) in waves.iter().enumerate() {
            println!("    {} {}", style(format!("wave {i}:")).dim(), wave.join(", "));
        }
        for entry in &unknown {
            println!("  {} no plugin for {entry}", style("✗").red().bold());
        }
        println!();
    }

    if !unknown.is_empty() {
        bail!("{} node(s) reference unknown providers or runners", unknown.len());
    }
    Ok(())
}

/// Compute and print the plan for a declaration file.
pub async fn plan(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let declarations = load_declarations(file).await?;
    let plan = state.orchestrator().plan(declarations).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        render::print_plan(&plan, false);
    }
    Ok(())
}
