//! Structural attribute diff between a state record and a declaration.

use reconcile_types::node::Attributes;

use crate::provider::ProviderSchema;

/// Attribute names that differ, each list sorted.
///
/// Values compare as JSON, so maps are equal regardless of key order and
/// references compare by their `${node.output}` form rather than by the
/// value they resolve to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl AttributeDiff {
    pub fn between(stored: &Attributes, declared: &Attributes) -> Self {
        let mut diff = Self::default();
        for (key, value) in declared {
            match stored.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if old.to_json() != value.to_json() => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = stored
            .keys()
            .filter(|k| !declared.contains_key(*k))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Every differing attribute name, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.changed)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Differing attributes the provider cannot change in place.
    pub fn forced(&self, schema: &ProviderSchema) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| schema.forces_replacement(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::node::AttrValue;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_identical_attributes_have_empty_diff() {
        let a = attrs(json!({"zone": "us-east1-b", "tags": {"env": "prod", "team": "web"}}));
        let b = attrs(json!({"tags": {"team": "web", "env": "prod"}, "zone": "us-east1-b"}));
        assert!(AttributeDiff::between(&a, &b).is_empty());
    }

    #[test]
    fn test_added_removed_changed() {
        let stored = attrs(json!({"zone": "a", "size": 1, "old": true}));
        let declared = attrs(json!({"zone": "b", "size": 1, "new": "x"}));
        let diff = AttributeDiff::between(&stored, &declared);
        assert_eq!(diff.added, vec!["new"]);
        assert_eq!(diff.removed, vec!["old"]);
        assert_eq!(diff.changed, vec!["zone"]);
        assert_eq!(diff.keys(), vec!["new", "old", "zone"]);
    }

    #[test]
    fn test_list_order_matters() {
        let stored = attrs(json!({"ports": [80, 443]}));
        let declared = attrs(json!({"ports": [443, 80]}));
        assert_eq!(AttributeDiff::between(&stored, &declared).changed, vec!["ports"]);
    }

    #[test]
    fn test_literal_and_normalized_map_compare_equal() {
        let mut stored = Attributes::new();
        stored.insert("meta".to_string(), AttrValue::Literal(json!({"a": 1})));
        let declared = attrs(json!({"meta": {"a": 1}}));
        assert!(AttributeDiff::between(&stored, &declared).is_empty());
    }

    #[test]
    fn test_reference_change_is_detected() {
        let stored = attrs(json!({"net": "${network.name}"}));
        let declared = attrs(json!({"net": "${network.id}"}));
        assert_eq!(AttributeDiff::between(&stored, &declared).changed, vec!["net"]);
    }

    #[test]
    fn test_forced_filters_by_schema() {
        let stored = attrs(json!({"image": "v1", "size": 1}));
        let declared = attrs(json!({"image": "v2", "size": 2}));
        let diff = AttributeDiff::between(&stored, &declared);
        let schema = ProviderSchema::forcing(["image"]);
        assert_eq!(diff.forced(&schema), vec!["image"]);
        assert!(diff.forced(&ProviderSchema::default()).is_empty());
    }
}
