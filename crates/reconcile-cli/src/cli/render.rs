//! Styled terminal rendering shared by the commands.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use reconcile_types::plan::{Operation, Plan, PlannedChange};
use reconcile_types::run::{NodeOutcome, RunReport};
use reconcile_types::state::StateRecord;

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.iter().map(|h| Cell::new(h).fg(Color::White)));
    table
}

fn operation_color(operation: Operation) -> Color {
    match operation {
        Operation::Create => Color::Green,
        Operation::Update => Color::Yellow,
        Operation::Replace => Color::Magenta,
        Operation::Delete => Color::Red,
        Operation::Run => Color::Cyan,
        Operation::NoOp => Color::DarkGrey,
    }
}

fn detail(change: &PlannedChange) -> String {
    match (&change.reason, change.changed_attributes.is_empty()) {
        (Some(reason), _) => reason.clone(),
        (None, false) => change.changed_attributes.join(", "),
        (None, true) => String::new(),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

/// Print a plan; unchanged nodes are listed only when `show_unchanged`.
pub fn print_plan(plan: &Plan, show_unchanged: bool) {
    println!();
    if !plan.has_changes() {
        println!(
            "  {} No changes. Infrastructure matches the declarations.",
            style("✓").green().bold()
        );
        println!();
        return;
    }

    let mut table = table(&["", "Node", "Type", "Operation", "Detail"]);
    for change in &plan.changes {
        if change.operation == Operation::NoOp && !show_unchanged {
            continue;
        }
        let color = operation_color(change.operation);
        table.add_row(vec![
            Cell::new(change.operation.symbol()).fg(color),
            Cell::new(&change.node_id),
            Cell::new(&change.node_type),
            Cell::new(change.operation).fg(color),
            Cell::new(truncate(&detail(change), 60)),
        ]);
    }
    println!("{table}");
    println!();
    println!("  {} {}", style("Plan:").bold(), plan.summary());
    println!();
}

/// Print the per-node outcome of a run and a one-line summary.
pub fn print_report(report: &RunReport) {
    let mut table = table(&["Node", "Operation", "Outcome", "Attempts", "Time"]);
    for node in &report.nodes {
        let outcome = match &node.outcome {
            NodeOutcome::Success => Cell::new("✓ success").fg(Color::Green),
            NodeOutcome::NoOp => Cell::new("= no-op").fg(Color::DarkGrey),
            NodeOutcome::Failed { reason } => {
                Cell::new(format!("✗ {}", truncate(reason, 60))).fg(Color::Red)
            }
            NodeOutcome::Skipped { reason } => Cell::new(format!("○ {reason}")).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&node.node_id),
            Cell::new(node.operation),
            outcome,
            Cell::new(node.attempts),
            Cell::new(format!("{}ms", node.elapsed_ms)),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    let s = &report.summary;
    let marker = if report.is_success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!(
        "  {marker} Run {} {}: {} succeeded, {} unchanged, {} failed, {} skipped",
        style(report.run_id).dim(),
        report.phase,
        style(s.succeeded).green(),
        s.no_op,
        style(s.failed).red(),
        style(s.skipped).yellow(),
    );
    println!();
}

pub fn print_records(records: &[StateRecord]) {
    let mut table = table(&["Node", "Type", "Identity", "Serial", "Updated"]);
    for record in records {
        table.add_row(vec![
            Cell::new(&record.node_id),
            Cell::new(&record.resource_type),
            Cell::new(truncate(&record.identity, 48)),
            Cell::new(record.serial),
            Cell::new(record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    println!();
    println!("{table}");
    println!();
}
