//! Run tracking types: per-node outcomes and the final run report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::{Operation, Plan};

// ---------------------------------------------------------------------------
// Run phase
// ---------------------------------------------------------------------------

/// Lifecycle of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run started yet.
    Idle,
    Building,
    Planning,
    Applying,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Building => "building",
            RunPhase::Planning => "planning",
            RunPhase::Applying => "applying",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Node outcome
// ---------------------------------------------------------------------------

/// Why a node was not executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// A node this one depends on (directly or transitively) failed.
    UpstreamFailed { node: String },
    /// The run was cancelled before the node was dispatched.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed { node } => write!(f, "upstream '{node}' failed"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Final outcome of one node in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success,
    NoOp,
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl NodeOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, NodeOutcome::Skipped { .. })
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Success => write!(f, "success"),
            NodeOutcome::NoOp => write!(f, "no-op"),
            NodeOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            NodeOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Outcome of one node plus timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub operation: Operation,
    pub outcome: NodeOutcome,
    /// Provider or runner calls made, including retries.
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl NodeReport {
    /// Report for a node that never reached a provider.
    pub fn without_attempts(
        node_id: impl Into<String>,
        operation: Operation,
        outcome: NodeOutcome,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            operation,
            outcome,
            attempts: 0,
            elapsed_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Run summary / report
// ---------------------------------------------------------------------------

/// Count of node outcomes in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub no_op: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[NodeReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            summary.add(&report.outcome);
        }
        summary
    }

    pub fn add(&mut self, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Success => self.succeeded += 1,
            NodeOutcome::NoOp => self.no_op += 1,
            NodeOutcome::Failed { .. } => self.failed += 1,
            NodeOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.no_op + self.failed + self.skipped
    }

    /// No node failed or was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Everything a caller needs to audit a run: the applied plan and every
/// node's outcome, including skipped ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub plan: Plan,
    pub nodes: Vec<NodeReport>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn node(&self, node_id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Done && self.summary.is_clean()
    }
}
