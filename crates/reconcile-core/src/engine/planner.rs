//! Diff and plan engine.
//!
//! Compares each declared node with its state record and emits one
//! [`PlannedChange`] per node, plus a deletion for every record whose node is
//! no longer declared. Non-destructive steps come first in wave order;
//! deletions follow in reverse dependency order so nothing is destroyed
//! while a live resource still references it.

use std::collections::{BTreeMap, HashMap};

use reconcile_types::error::StateError;
use reconcile_types::node::{Declaration, NodeKind};
use reconcile_types::plan::{Operation, Plan, PlannedChange};
use reconcile_types::state::StateRecord;
use thiserror::Error;

use super::diff::AttributeDiff;
use super::graph::Graph;
use super::scheduler::{SchedulerError, kahn_waves, schedule};
use crate::provider::{ProviderSchema, SchemaSource};
use crate::repository::StateStore;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Compute the plan that moves stored state to the declared graph.
///
/// Deterministic: the same graph and state always produce the same plan.
/// Reads state only; never writes.
pub async fn plan<S, C>(graph: &Graph, store: &S, schemas: &C) -> Result<Plan, PlanError>
where
    S: StateStore,
    C: SchemaSource + ?Sized,
{
    let records: BTreeMap<String, StateRecord> = store
        .list()
        .await?
        .into_iter()
        .map(|r| (r.node_id.clone(), r))
        .collect();

    let mut changes = Vec::with_capacity(graph.len());
    let mut planned: HashMap<String, Operation> = HashMap::with_capacity(graph.len());

    for node_id in schedule(graph)?.into_iter().flatten() {
        let Some(decl) = graph.get(&node_id) else {
            continue;
        };
        let mut change = match decl.kind {
            NodeKind::Job => PlannedChange {
                node_id: decl.id.clone(),
                kind: NodeKind::Job,
                node_type: decl.node_type.clone(),
                operation: Operation::Run,
                changed_attributes: Vec::new(),
                reason: None,
                depends_on: Vec::new(),
                refresh_dependencies: false,
            },
            NodeKind::Resource => {
                let schema = schemas.schema_for(&decl.node_type).unwrap_or_default();
                let mut change = diff_resource(decl, records.get(&decl.id), &schema);
                cascade_replacements(&mut change, decl, graph, &planned, &schema);
                change
            }
        };
        change.depends_on = graph
            .dependencies_of(&decl.id)
            .into_iter()
            .map(String::from)
            .collect();
        if change.operation == Operation::NoOp {
            if let Some(record) = records.get(&decl.id) {
                if !same_dependencies(&record.dependencies, &change.depends_on) {
                    change.refresh_dependencies = true;
                    change.reason = Some("dependencies changed".to_string());
                }
            }
        }

        planned.insert(change.node_id.clone(), change.operation);
        changes.push(change);
    }

    changes.extend(plan_deletions(graph, &records)?);

    let plan = Plan::new(changes);
    tracing::debug!(
        steps = plan.len(),
        summary = %plan.summary(),
        "plan computed"
    );
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Per-resource diff
// ---------------------------------------------------------------------------

fn diff_resource(
    decl: &Declaration,
    record: Option<&StateRecord>,
    schema: &ProviderSchema,
) -> PlannedChange {
    let mut change = PlannedChange {
        node_id: decl.id.clone(),
        kind: NodeKind::Resource,
        node_type: decl.node_type.clone(),
        operation: Operation::Create,
        changed_attributes: Vec::new(),
        reason: None,
        depends_on: Vec::new(),
        refresh_dependencies: false,
    };

    let Some(record) = record else {
        return change;
    };

    if record.resource_type != decl.node_type {
        change.operation = Operation::Replace;
        change.reason = Some(format!(
            "type changed from '{}' to '{}'",
            record.resource_type, decl.node_type
        ));
        return change;
    }

    let diff = AttributeDiff::between(&record.attributes, &decl.attributes);
    if diff.is_empty() {
        change.operation = Operation::NoOp;
        return change;
    }

    let forced = diff.forced(schema);
    change.changed_attributes = diff.keys();
    if forced.is_empty() {
        change.operation = Operation::Update;
    } else {
        change.operation = Operation::Replace;
        change.reason = Some(format!("{} forces replacement", forced.join(", ")));
    }
    change
}

/// A resource whose inputs reference a node being created or replaced will
/// see a new value at apply time even though its declared attributes did not
/// change. Plan it as an Update, or a Replace when the referencing attribute
/// cannot change in place.
fn cascade_replacements(
    change: &mut PlannedChange,
    decl: &Declaration,
    graph: &Graph,
    planned: &HashMap<String, Operation>,
    schema: &ProviderSchema,
) {
    if !matches!(change.operation, Operation::NoOp | Operation::Update) {
        return;
    }

    for upstream in graph.dependencies_of(&decl.id) {
        if !matches!(
            planned.get(upstream),
            Some(Operation::Create | Operation::Replace)
        ) {
            continue;
        }
        let referencing = decl.attributes_referencing(upstream);
        if referencing.is_empty() {
            continue;
        }

        let reason = format!("upstream '{upstream}' is replaced");
        if referencing.iter().any(|a| schema.forces_replacement(a)) {
            change.operation = Operation::Replace;
            change.reason = Some(reason);
        } else if change.operation == Operation::NoOp {
            change.operation = Operation::Update;
            change.reason = Some(reason);
        }

        for attr in referencing {
            if !change.changed_attributes.iter().any(|a| a == attr) {
                change.changed_attributes.push(attr.to_string());
            }
        }
        change.changed_attributes.sort();

        if change.operation == Operation::Replace {
            return;
        }
    }
}

/// Stored and declared dependency lists name the same nodes. Deletions are
/// ordered from stored dependencies, so these must track the graph.
fn same_dependencies(stored: &[String], declared: &[String]) -> bool {
    let mut stored: Vec<&str> = stored.iter().map(String::as_str).collect();
    let mut declared: Vec<&str> = declared.iter().map(String::as_str).collect();
    stored.sort_unstable();
    stored.dedup();
    declared.sort_unstable();
    declared.dedup();
    stored == declared
}

// ---------------------------------------------------------------------------
// Deletions
// ---------------------------------------------------------------------------

/// Deletions for records whose node is no longer declared.
///
/// A deletion of R waits for every step of a node whose stored dependencies
/// contain R; among deletions, that yields reverse dependency order.
fn plan_deletions(
    graph: &Graph,
    records: &BTreeMap<String, StateRecord>,
) -> Result<Vec<PlannedChange>, SchedulerError> {
    let orphans: Vec<&StateRecord> = records
        .values()
        .filter(|r| !graph.contains(&r.node_id))
        .collect();
    if orphans.is_empty() {
        return Ok(Vec::new());
    }

    let position: HashMap<&str, usize> = orphans
        .iter()
        .enumerate()
        .map(|(i, r)| (r.node_id.as_str(), i))
        .collect();

    // Edge (dependent, dependency): the dependency is deleted afterwards.
    let mut edges = Vec::new();
    for (dependent, record) in orphans.iter().enumerate() {
        for dep in &record.dependencies {
            if let Some(&dependency) = position.get(dep.as_str()) {
                if dependency != dependent {
                    edges.push((dependent, dependency));
                }
            }
        }
    }

    let waves = kahn_waves(orphans.len(), &edges).map_err(|stuck| {
        SchedulerError::Unschedulable(
            stuck
                .iter()
                .map(|&p| orphans[p].node_id.clone())
                .collect(),
        )
    })?;

    Ok(waves
        .into_iter()
        .flatten()
        .map(|p| {
            let record = orphans[p];
            let depends_on = records
                .values()
                .filter(|r| r.node_id != record.node_id && r.dependencies.contains(&record.node_id))
                .map(|r| r.node_id.clone())
                .collect();
            PlannedChange {
                node_id: record.node_id.clone(),
                kind: NodeKind::Resource,
                node_type: record.resource_type.clone(),
                operation: Operation::Delete,
                changed_attributes: Vec::new(),
                reason: Some("no longer declared".to_string()),
                depends_on,
                refresh_dependencies: false,
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
