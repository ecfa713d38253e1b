//! Graph builder: declarations to a validated dependency DAG.
//!
//! Edges come from two places: the explicit `needs` list and every
//! `${node.output}` reference found anywhere inside a declaration's
//! attributes. Both are matched exactly on node ID. The result is stored in a
//! `petgraph::DiGraph` with edges pointing from dependency to dependent, so
//! walking outgoing neighbours yields the nodes unblocked by a completion.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use reconcile_types::node::Declaration;
use thiserror::Error;

/// Graph construction errors. All are fatal to a run and raised before any
/// side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// `path` lists the cycle in dependency direction and repeats its first
    /// node at the end, e.g. `[a, b, a]`.
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("node '{from}' depends on undeclared node '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),
}

/// Immutable dependency graph for one run. Share it behind `Arc`.
#[derive(Debug, Clone)]
pub struct Graph {
    declarations: Vec<Declaration>,
    index: HashMap<String, NodeIndex>,
    dag: DiGraph<usize, ()>,
}

impl Graph {
    /// Build and validate a graph. Node order (declaration order) is kept and
    /// used as the tie-break everywhere downstream.
    pub fn build(declarations: Vec<Declaration>) -> Result<Self, GraphError> {
        let mut dag = DiGraph::<usize, ()>::with_capacity(declarations.len(), 0);
        let mut index = HashMap::with_capacity(declarations.len());

        for (pos, decl) in declarations.iter().enumerate() {
            let idx = dag.add_node(pos);
            if index.insert(decl.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateNode(decl.id.clone()));
            }
        }

        for decl in &declarations {
            let dependent = index[&decl.id];
            let targets = decl
                .needs
                .iter()
                .map(String::as_str)
                .chain(decl.references().into_iter().map(|r| r.node.as_str()));
            for target in targets {
                let dependency =
                    *index
                        .get(target)
                        .ok_or_else(|| GraphError::DanglingReference {
                            from: decl.id.clone(),
                            to: target.to_string(),
                        })?;
                dag.update_edge(dependency, dependent, ());
            }
        }

        let graph = Self {
            declarations,
            index,
            dag,
        };
        graph.check_acyclic()?;

        tracing::debug!(
            nodes = graph.declarations.len(),
            edges = graph.dag.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    // -----------------------------------------------------------------------
    // Cycle detection
    // -----------------------------------------------------------------------

    /// Depth-first search with an in-progress marker. Reaching a node that
    /// is still in progress closes a cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            New,
            InProgress,
            Done,
        }

        fn visit(
            graph: &Graph,
            pos: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Result<(), GraphError> {
            marks[pos] = Mark::InProgress;
            stack.push(pos);
            for dep in graph.dependency_positions(pos) {
                match marks[dep] {
                    Mark::Done => {}
                    Mark::InProgress => {
                        let start = stack.iter().position(|&p| p == dep).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|&p| graph.declarations[p].id.clone())
                            .collect();
                        path.push(graph.declarations[dep].id.clone());
                        return Err(GraphError::Cycle { path });
                    }
                    Mark::New => visit(graph, dep, marks, stack)?,
                }
            }
            stack.pop();
            marks[pos] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.declarations.len()];
        let mut stack = Vec::new();
        for pos in 0..self.declarations.len() {
            if marks[pos] == Mark::New {
                visit(self, pos, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&Declaration> {
        self.index
            .get(node_id)
            .map(|&idx| &self.declarations[self.dag[idx]])
    }

    /// Declarations in declaration order.
    pub fn nodes(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.declarations.iter().map(|d| d.id.as_str()).collect()
    }

    /// Position of a node in declaration order.
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).map(|&idx| self.dag[idx])
    }

    /// Direct dependencies, in declaration order.
    pub fn dependencies_of(&self, node_id: &str) -> Vec<&str> {
        self.neighbours(node_id, Direction::Incoming)
    }

    /// Direct dependents, in declaration order.
    pub fn dependents_of(&self, node_id: &str) -> Vec<&str> {
        self.neighbours(node_id, Direction::Outgoing)
    }

    /// Every node that depends on `node_id` directly or transitively, in
    /// declaration order.
    pub fn transitive_dependents(&self, node_id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for next in self.dag.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(self.dag[next]) {
                    stack.push(next);
                }
            }
        }
        let mut positions: Vec<usize> = seen.into_iter().collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .map(|p| self.declarations[p].id.as_str())
            .collect()
    }

    /// Edges as `(dependency, dependent)` declaration positions.
    pub(crate) fn edge_positions(&self) -> Vec<(usize, usize)> {
        self.dag
            .edge_indices()
            .filter_map(|e| self.dag.edge_endpoints(e))
            .map(|(from, to)| (self.dag[from], self.dag[to]))
            .collect()
    }

    fn dependency_positions(&self, pos: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .dag
            .neighbors_directed(NodeIndex::new(pos), Direction::Incoming)
            .map(|n| self.dag[n])
            .collect();
        deps.sort_unstable();
        deps
    }

    fn neighbours(&self, node_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .dag
            .neighbors_directed(idx, direction)
            .map(|n| self.dag[n])
            .collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .map(|p| self.declarations[p].id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
