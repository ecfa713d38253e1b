//! Persisted state: last-applied records and in-flight intents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::Attributes;
use crate::plan::Operation;

/// Output key that always resolves to a record's provider identity.
pub const IDENTITY_OUTPUT: &str = "id";

/// Last-applied state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub node_id: String,
    /// Provider that owns the resource.
    pub resource_type: String,
    /// Declared (unresolved) attributes as of the last apply.
    pub attributes: Attributes,
    /// Provider-assigned handle (instance name, file path, ...).
    pub identity: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Nodes this resource depended on when applied. Orders deletions of
    /// resources that are no longer declared.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Number of successful applies.
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Look up an output by key; `id` is the identity.
    pub fn output(&self, key: &str) -> Option<serde_json::Value> {
        if key == IDENTITY_OUTPUT {
            return Some(serde_json::Value::String(self.identity.clone()));
        }
        self.outputs.get(key).cloned()
    }
}

/// Journal entry written before a provider mutation and cleared when the
/// result is committed. A leftover intent means the process stopped while
/// the call was in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub node_id: String,
    pub resource_type: String,
    pub operation: Operation,
    /// Identity before the operation, if the resource already existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Declared attributes the operation was applying.
    pub attributes: Attributes,
    /// The same attributes with references resolved, as sent to the provider.
    #[serde(default)]
    pub resolved: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Serial of the record being replaced, 0 for a create.
    #[serde(default)]
    pub previous_serial: u64,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_resolves_identity() {
        let record = StateRecord {
            node_id: "net".to_string(),
            resource_type: "null".to_string(),
            attributes: Attributes::new(),
            identity: "net-123".to_string(),
            outputs: BTreeMap::from([("name".to_string(), serde_json::json!("default"))]),
            dependencies: vec![],
            serial: 1,
            updated_at: Utc::now(),
        };
        assert_eq!(record.output("id"), Some(serde_json::json!("net-123")));
        assert_eq!(record.output("name"), Some(serde_json::json!("default")));
        assert_eq!(record.output("missing"), None);
    }
}
