//! Declaration types: the desired-state input of a run.
//!
//! A [`Declaration`] describes one resource or job. Its attributes are
//! [`AttrValue`]s, which may embed [`Reference`]s to other nodes' outputs.
//! References are how resources pick up implicit dependencies; jobs use the
//! explicit `needs` list.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute map of a declaration, keyed by attribute name.
pub type Attributes = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Whether a node is reconciled against state or executed as a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Infrastructure resource, diffed against its state record.
    Resource,
    /// Pipeline job, run on every apply.
    Job,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Resource => write!(f, "resource"),
            NodeKind::Job => write!(f, "job"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

/// A typed reference to another node's output, written `${node.output}`.
///
/// The output key is the segment after the last dot; everything before it is
/// the node ID, so IDs such as `data.network` are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub node: String,
    pub output: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }

    /// Parse a whole-string reference. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
        if inner.is_empty() || inner.contains(|c: char| c.is_whitespace() || c == '{' || c == '}')
        {
            return None;
        }
        let (node, output) = inner.rsplit_once('.')?;
        if node.is_empty() || output.is_empty() {
            return None;
        }
        Some(Self::new(node, output))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.output)
    }
}

// ---------------------------------------------------------------------------
// AttrValue
// ---------------------------------------------------------------------------

/// A declared attribute value.
///
/// Serialized through `serde_json::Value`: objects become `Map`, arrays
/// become `List`, strings of the form `${node.output}` become `Reference`,
/// and every other value stays a `Literal` scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum AttrValue {
    Literal(serde_json::Value),
    Reference(Reference),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Build a value from any JSON, normalizing nested objects and arrays.
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::from(value.into())
    }

    pub fn reference(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference(Reference::new(node, output))
    }

    /// Every reference reachable from this value, depth first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Reference(r) => found.push(r),
            AttrValue::List(items) => {
                for item in items {
                    item.collect_references(found);
                }
            }
            AttrValue::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(found);
                }
            }
        }
    }

    /// Replace every reference using `lookup`, producing plain JSON.
    ///
    /// Fails with the first reference `lookup` cannot satisfy.
    pub fn resolve<F>(&self, lookup: &mut F) -> Result<serde_json::Value, Reference>
    where
        F: FnMut(&Reference) -> Option<serde_json::Value>,
    {
        match self {
            AttrValue::Literal(v) => Ok(v.clone()),
            AttrValue::Reference(r) => lookup(r).ok_or_else(|| r.clone()),
            AttrValue::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            AttrValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(serde_json::Value::Object(out))
            }
        }
    }

    /// The value as JSON, with references rendered as `${node.output}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => match Reference::parse(&s) {
                Some(r) => AttrValue::Reference(r),
                None => AttrValue::Literal(serde_json::Value::String(s)),
            },
            serde_json::Value::Array(items) => {
                AttrValue::List(items.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(entries) => AttrValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, AttrValue::from(v)))
                    .collect(),
            ),
            other => AttrValue::Literal(other),
        }
    }
}

impl From<AttrValue> for serde_json::Value {
    fn from(value: AttrValue) -> Self {
        match value {
            AttrValue::Literal(v) => v,
            AttrValue::Reference(r) => serde_json::Value::String(r.to_string()),
            AttrValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            AttrValue::Map(entries) => serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Declaration
// ---------------------------------------------------------------------------

/// One declared node: a resource or a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique node ID within a declaration set.
    pub id: String,
    pub kind: NodeKind,
    /// Provider name for resources, runner name for jobs.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Explicit dependencies by node ID.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Per-call provider timeout, overriding the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Declaration {
    pub fn resource(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Resource, resource_type)
    }

    pub fn job(id: impl Into<String>, runner: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Job, runner)
    }

    fn new(id: impl Into<String>, kind: NodeKind, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            node_type: node_type.into(),
            attributes: Attributes::new(),
            needs: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs.extend(needs.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// References found in all attributes, in attribute-name order.
    pub fn references(&self) -> Vec<&Reference> {
        self.attributes
            .values()
            .flat_map(AttrValue::references)
            .collect()
    }

    /// Attribute names whose value references `node`.
    pub fn attributes_referencing(&self, node: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, v)| v.references().iter().any(|r| r.node == node))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DeclarationFile
// ---------------------------------------------------------------------------

/// On-disk layout of a declaration file: resources and jobs in two lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclarationFile {
    #[serde(default)]
    pub resources: Vec<DeclarationEntry>,
    #[serde(default)]
    pub jobs: Vec<DeclarationEntry>,
}

/// A declaration without its kind, which comes from the list it sits in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarationEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl DeclarationFile {
    /// Flatten into declarations; resources first, each list in file order.
    pub fn into_declarations(self) -> Vec<Declaration> {
        let resources = self
            .resources
            .into_iter()
            .map(|e| e.into_declaration(NodeKind::Resource));
        let jobs = self
            .jobs
            .into_iter()
            .map(|e| e.into_declaration(NodeKind::Job));
        resources.chain(jobs).collect()
    }
}

impl DeclarationEntry {
    fn into_declaration(self, kind: NodeKind) -> Declaration {
        Declaration {
            id: self.id,
            kind,
            node_type: self.node_type,
            attributes: self.attributes,
            needs: self.needs,
            timeout_secs: self.timeout_secs,
        }
    }
}
