//! ResourceProvider trait and the BoxResourceProvider wrapper.
//!
//! Providers own the side effects of the resource graph: creating, updating
//! and deleting one kind of infrastructure object. The engine never talks to
//! a cloud API directly.
//!
//! Object safety follows the blanket-impl pattern:
//! 1. `ResourceProviderDyn` mirrors the trait with boxed futures
//! 2. every `T: ResourceProvider` gets `ResourceProviderDyn` for free
//! 3. `BoxResourceProvider` wraps `Box<dyn ResourceProviderDyn>` and delegates

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use reconcile_types::error::ProviderError;
use reconcile_types::plan::Operation;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Attributes of one resource with every reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub node_id: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ResourceRequest {
    pub fn new(node_id: impl Into<String>, attributes: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            node_id: node_id.into(),
            attributes,
        }
    }

    /// String attribute, if present and a string.
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// What a provider returns after a successful create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Provider-assigned handle, stored in the state record.
    pub identity: String,
    /// Values other nodes may reference as `${node.key}`.
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl Applied {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }
}

/// Static facts a provider declares about its resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSchema {
    /// Attributes that cannot change in place; a change plans a Replace.
    pub forces_replacement: BTreeSet<String>,
}

impl ProviderSchema {
    pub fn forcing<I, S>(attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            forces_replacement: attrs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn forces_replacement(&self, attribute: &str) -> bool {
        self.forces_replacement.contains(attribute)
    }
}

// ---------------------------------------------------------------------------
// ResourceProvider
// ---------------------------------------------------------------------------

/// Backend for one resource type (e.g. `null`, `local_file`).
///
/// Every mutating call may fail with a [`ProviderError`]; mark transient
/// failures `retryable` so the executor backs off and tries again.
///
/// Implementations live in reconcile-infra (e.g. `LocalFileProvider`).
pub trait ResourceProvider: Send + Sync {
    /// Resource type this provider serves; matches `Declaration::node_type`.
    fn name(&self) -> &str;

    fn schema(&self) -> ProviderSchema {
        ProviderSchema::default()
    }

    /// Whether an in-flight call for `operation` may be abandoned on
    /// timeout. Non-interruptible calls are awaited to completion.
    fn interruptible(&self, _operation: Operation) -> bool {
        true
    }

    fn create(
        &self,
        request: &ResourceRequest,
    ) -> impl Future<Output = Result<Applied, ProviderError>> + Send;

    /// Update in place. May return a new identity.
    fn update(
        &self,
        identity: &str,
        request: &ResourceRequest,
    ) -> impl Future<Output = Result<Applied, ProviderError>> + Send;

    /// Delete. Deleting something already gone must succeed.
    fn delete(&self, identity: &str) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Provider-side existence check, used to reconcile interrupted runs.
    fn exists(&self, identity: &str) -> impl Future<Output = Result<bool, ProviderError>> + Send;

    /// Find a resource created by an interrupted run from its attributes.
    ///
    /// Providers that cannot search return `None` (the default), in which
    /// case the engine creates the resource again.
    fn lookup(
        &self,
        _request: &ResourceRequest,
    ) -> impl Future<Output = Result<Option<Applied>, ProviderError>> + Send {
        async { Ok(None) }
    }
}

// ---------------------------------------------------------------------------
// Object-safe wrapper
// ---------------------------------------------------------------------------

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Object-safe version of [`ResourceProvider`] with boxed futures.
pub trait ResourceProviderDyn: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> ProviderSchema;
    fn interruptible(&self, operation: Operation) -> bool;
    fn create_boxed<'a>(&'a self, request: &'a ResourceRequest) -> BoxFuture<'a, Applied>;
    fn update_boxed<'a>(
        &'a self,
        identity: &'a str,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, Applied>;
    fn delete_boxed<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, ()>;
    fn exists_boxed<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, bool>;
    fn lookup_boxed<'a>(&'a self, request: &'a ResourceRequest) -> BoxFuture<'a, Option<Applied>>;
}

impl<T: ResourceProvider> ResourceProviderDyn for T {
    fn name(&self) -> &str {
        ResourceProvider::name(self)
    }

    fn schema(&self) -> ProviderSchema {
        ResourceProvider::schema(self)
    }

    fn interruptible(&self, operation: Operation) -> bool {
        ResourceProvider::interruptible(self, operation)
    }

    fn create_boxed<'a>(&'a self, request: &'a ResourceRequest) -> BoxFuture<'a, Applied> {
        Box::pin(self.create(request))
    }

    fn update_boxed<'a>(
        &'a self,
        identity: &'a str,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, Applied> {
        Box::pin(self.update(identity, request))
    }

    fn delete_boxed<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.delete(identity))
    }

    fn exists_boxed<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.exists(identity))
    }

    fn lookup_boxed<'a>(&'a self, request: &'a ResourceRequest) -> BoxFuture<'a, Option<Applied>> {
        Box::pin(self.lookup(request))
    }
}

/// Type-erased resource provider for runtime selection by resource type.
///
/// `ResourceProvider` uses RPITIT and cannot be a trait object; this box
/// offers the same methods over `dyn ResourceProviderDyn`.
pub struct BoxResourceProvider {
    inner: Box<dyn ResourceProviderDyn>,
}

impl BoxResourceProvider {
    pub fn new<T: ResourceProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn schema(&self) -> ProviderSchema {
        self.inner.schema()
    }

    pub fn interruptible(&self, operation: Operation) -> bool {
        self.inner.interruptible(operation)
    }

    pub async fn create(&self, request: &ResourceRequest) -> Result<Applied, ProviderError> {
        self.inner.create_boxed(request).await
    }

    pub async fn update(
        &self,
        identity: &str,
        request: &ResourceRequest,
    ) -> Result<Applied, ProviderError> {
        self.inner.update_boxed(identity, request).await
    }

    pub async fn delete(&self, identity: &str) -> Result<(), ProviderError> {
        self.inner.delete_boxed(identity).await
    }

    pub async fn exists(&self, identity: &str) -> Result<bool, ProviderError> {
        self.inner.exists_boxed(identity).await
    }

    pub async fn lookup(&self, request: &ResourceRequest) -> Result<Option<Applied>, ProviderError> {
        self.inner.lookup_boxed(request).await
    }
}
