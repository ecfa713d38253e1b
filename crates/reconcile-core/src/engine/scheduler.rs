//! Topological scheduler: Kahn's algorithm grouped into waves.
//!
//! A wave is every node whose in-degree reaches zero in the same step. All
//! nodes in a wave have their dependencies satisfied by earlier waves and
//! may run concurrently. Within a wave, nodes keep declaration order.

use std::collections::HashMap;

use reconcile_types::plan::Plan;
use thiserror::Error;

use super::graph::Graph;

/// Node IDs that may execute concurrently.
pub type Wave = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Nodes that never reached in-degree zero. Graph building rejects
    /// cycles, so this is an internal invariant violation.
    #[error("nodes could not be scheduled (cycle escaped validation): {}", .0.join(", "))]
    Unschedulable(Vec<String>),
}

/// Waves over every node of the graph.
pub fn schedule(graph: &Graph) -> Result<Vec<Wave>, SchedulerError> {
    let ids = graph.node_ids();
    let waves = kahn_waves(ids.len(), &graph.edge_positions()).map_err(|stuck| {
        SchedulerError::Unschedulable(stuck.iter().map(|&p| ids[p].to_string()).collect())
    })?;
    Ok(to_ids(&waves, &ids))
}

/// Waves over the steps of a plan, using each step's `depends_on`.
///
/// Dependencies on nodes that have no step in the plan are already settled
/// and are ignored.
pub fn schedule_plan(plan: &Plan) -> Result<Vec<Wave>, SchedulerError> {
    let ids: Vec<&str> = plan.changes.iter().map(|c| c.node_id.as_str()).collect();
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut edges = Vec::new();
    for (dependent, change) in plan.changes.iter().enumerate() {
        for dep in &change.depends_on {
            if let Some(&dependency) = position.get(dep.as_str()) {
                edges.push((dependency, dependent));
            }
        }
    }

    let waves = kahn_waves(ids.len(), &edges).map_err(|stuck| {
        SchedulerError::Unschedulable(stuck.iter().map(|&p| ids[p].to_string()).collect())
    })?;
    Ok(to_ids(&waves, &ids))
}

/// Kahn's algorithm over `count` nodes identified by position, with edges as
/// `(dependency, dependent)`. Waves are sorted by position.
///
/// On failure returns the positions that never became ready.
pub(crate) fn kahn_waves(
    count: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(dependency, dependent) in edges {
        in_degree[dependent] += 1;
        dependents[dependency].push(dependent);
    }

    let mut ready: Vec<usize> = (0..count).filter(|&p| in_degree[p] == 0).collect();
    let mut waves = Vec::new();
    let mut scheduled = 0;

    while !ready.is_empty() {
        let mut next = Vec::new();
        for &node in &ready {
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        scheduled += ready.len();
        waves.push(std::mem::replace(&mut ready, next));
    }

    if scheduled < count {
        return Err((0..count).filter(|&p| in_degree[p] > 0).collect());
    }
    Ok(waves)
}

fn to_ids(waves: &[Vec<usize>], ids: &[&str]) -> Vec<Wave> {
    waves
        .iter()
        .map(|wave| wave.iter().map(|&p| ids[p].to_string()).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use reconcile_types::node::{AttrValue, Declaration, NodeKind};
    use reconcile_types::plan::{Operation, PlannedChange};

    fn res(id: &str, refs: &[&str]) -> Declaration {
        let mut decl = Declaration::resource(id, "null");
        for r in refs {
            decl = decl.with_attribute(format!("in_{r}"), AttrValue::reference(*r, "id"));
        }
        decl
    }

    fn step(id: &str, depends_on: &[&str]) -> PlannedChange {
        PlannedChange {
            node_id: id.to_string(),
            kind: NodeKind::Resource,
            node_type: "null".to_string(),
            operation: Operation::Create,
            changed_attributes: vec![],
            reason: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            refresh_dependencies: false,
        }
    }

    #[test]
    fn test_empty_graph_has_no_waves() {
        let graph = Graph::build(vec![]).unwrap();
        assert!(schedule(&graph).unwrap().is_empty());
    }

    #[test]
    fn test_network_then_instance() {
        let graph = Graph::build(vec![
            res("network", &[]),
            Declaration::resource("instance", "null").with_needs(["network"]),
        ])
        .unwrap();
        let waves = schedule(&graph).unwrap();
        assert_eq!(waves, vec![vec!["network"], vec!["instance"]]);
    }

    #[test]
    fn test_diamond_waves() {
        let graph = Graph::build(vec![
            res("a", &[]),
            res("c", &["a"]),
            res("b", &["a"]),
            res("d", &["b", "c"]),
        ])
        .unwrap();
        let waves = schedule(&graph).unwrap();
        assert_eq!(waves, vec![vec!["a"], vec!["c", "b"], vec!["d"]]);
    }

    #[test]
    fn test_waves_partition_node_set() {
        let graph = Graph::build(vec![
            res("n0", &[]),
            res("n1", &["n0"]),
            res("n2", &[]),
            res("n3", &["n1", "n2"]),
            res("n4", &["n0"]),
            res("n5", &["n3", "n4"]),
            res("n6", &[]),
        ])
        .unwrap();
        let waves = schedule(&graph).unwrap();

        let flat: Vec<&String> = waves.iter().flatten().collect();
        let unique: HashSet<&String> = flat.iter().copied().collect();
        assert_eq!(flat.len(), graph.len(), "no duplicates");
        assert_eq!(unique.len(), graph.len(), "every node scheduled");

        let wave_of: HashMap<&str, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(i, w)| w.iter().map(move |id| (id.as_str(), i)))
            .collect();
        for decl in graph.nodes() {
            for dep in graph.dependencies_of(&decl.id) {
                assert!(wave_of[dep] < wave_of[decl.id.as_str()]);
            }
        }
    }

    #[test]
    fn test_wave_order_follows_declaration_order() {
        let graph = Graph::build(vec![res("zeta", &[]), res("alpha", &[]), res("mid", &[])]).unwrap();
        assert_eq!(schedule(&graph).unwrap(), vec![vec!["zeta", "alpha", "mid"]]);
    }

    #[test]
    fn test_schedule_plan_ignores_settled_dependencies() {
        let plan = Plan::new(vec![step("instance", &["network"]), step("dns", &["instance"])]);
        let waves = schedule_plan(&plan).unwrap();
        assert_eq!(waves, vec![vec!["instance"], vec!["dns"]]);
    }

    #[test]
    fn test_kahn_reports_stuck_nodes() {
        let stuck = kahn_waves(3, &[(1, 2), (2, 1)]).unwrap_err();
        assert_eq!(stuck, vec![1, 2]);
    }

    #[test]
    fn test_schedule_plan_cycle_is_invariant_violation() {
        let plan = Plan::new(vec![step("a", &["b"]), step("b", &["a"])]);
        let err = schedule_plan(&plan).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::Unschedulable(vec!["a".to_string(), "b".to_string()])
        );
    }
}
