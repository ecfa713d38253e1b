//! Plan types: the ordered set of operations computed by diffing
//! declarations against stored state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeKind;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// What the executor will do to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// No state record exists yet.
    Create,
    /// Attributes changed and can be updated in place.
    Update,
    /// A changed attribute forces delete-then-create.
    Replace,
    /// Record exists but the node is no longer declared.
    Delete,
    /// Declared attributes match the record.
    NoOp,
    /// Jobs always run.
    Run,
}

impl Operation {
    /// Whether applying this operation touches a provider or runner.
    pub fn is_change(&self) -> bool {
        !matches!(self, Operation::NoOp)
    }

    /// Short marker used in plan listings.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operation::Create => "+",
            Operation::Update => "~",
            Operation::Replace => "-/+",
            Operation::Delete => "-",
            Operation::NoOp => "=",
            Operation::Run => ">",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Replace => "replace",
            Operation::Delete => "delete",
            Operation::NoOp => "no-op",
            Operation::Run => "run",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "replace" => Ok(Operation::Replace),
            "delete" => Ok(Operation::Delete),
            "no-op" | "no_op" => Ok(Operation::NoOp),
            "run" => Ok(Operation::Run),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// PlannedChange
// ---------------------------------------------------------------------------

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub node_id: String,
    pub kind: NodeKind,
    /// Provider or runner name. For deletions, taken from the state record.
    #[serde(rename = "type")]
    pub node_type: String,
    pub operation: Operation,
    /// Attribute names that differ from the state record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Steps of this plan that must finish before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// NoOp whose stored dependency list is stale. The executor rewrites the
    /// record's dependencies without calling the provider.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refresh_dependencies: bool,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Ordered snapshot of planned changes.
///
/// Non-destructive steps come first in dependency order, deletions last in
/// reverse dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn new(changes: Vec<PlannedChange>) -> Self {
        Self { changes }
    }

    pub fn get(&self, node_id: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.node_id == node_id)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// True when at least one step is not a no-op.
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.operation.is_change())
    }

    /// `(node, operation)` pairs in plan order.
    pub fn operations(&self) -> Vec<(&str, Operation)> {
        self.changes
            .iter()
            .map(|c| (c.node_id.as_str(), c.operation))
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.operation {
                Operation::Create => summary.create += 1,
                Operation::Update => summary.update += 1,
                Operation::Replace => summary.replace += 1,
                Operation::Delete => summary.delete += 1,
                Operation::NoOp => summary.no_op += 1,
                Operation::Run => summary.run += 1,
            }
        }
        summary
    }
}

/// Counts of each operation in a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_op: usize,
    pub run: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} jobs to run, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.run, self.no_op
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, operation: Operation) -> PlannedChange {
        PlannedChange {
            node_id: id.to_string(),
            kind: NodeKind::Resource,
            node_type: "null".to_string(),
            operation,
            changed_attributes: vec![],
            reason: None,
            depends_on: vec![],
            refresh_dependencies: false,
        }
    }

    #[test]
    fn test_plan_without_changes() {
        let plan = Plan::new(vec![change("a", Operation::NoOp), change("b", Operation::NoOp)]);
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().no_op, 2);
    }

    #[test]
    fn test_plan_summary_counts() {
        let plan = Plan::new(vec![
            change("a", Operation::Create),
            change("b", Operation::Replace),
            change("c", Operation::Delete),
            change("d", Operation::Run),
        ]);
        let summary = plan.summary();
        assert!(plan.has_changes());
        assert_eq!(summary.create, 1);
        assert_eq!(summary.replace, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.run, 1);
        assert!(summary.to_string().contains("1 to delete"));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::NoOp.to_string(), "no-op");
        assert_eq!(Operation::Replace.symbol(), "-/+");
        let json = serde_json::to_string(&Operation::NoOp).unwrap();
        assert_eq!(json, "\"no_op\"");
    }

    #[test]
    fn test_operation_parse_matches_display() {
        for op in [
            Operation::Create,
            Operation::Update,
            Operation::Replace,
            Operation::Delete,
            Operation::NoOp,
            Operation::Run,
        ] {
            assert_eq!(op.to_string().parse::<Operation>(), Ok(op));
        }
        assert!("destroy".parse::<Operation>().is_err());
    }

    #[test]
    fn test_refresh_flag_serialized_only_when_set() {
        let mut step = change("web", Operation::NoOp);
        let json = serde_json::to_value(&step).unwrap();
        assert!(json.get("refresh_dependencies").is_none());

        step.refresh_dependencies = true;
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["refresh_dependencies"], true);
        let back: PlannedChange = serde_json::from_value(json).unwrap();
        assert!(back.refresh_dependencies);
    }
}
