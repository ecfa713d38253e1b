//! Name-indexed registry of providers and runners.

use std::collections::HashMap;
use std::sync::Arc;

use super::job::{BoxJobRunner, JobRunner};
use super::resource::{BoxResourceProvider, ProviderSchema, ResourceProvider};

/// Source of provider schemas for the planner.
///
/// Planning must not need live providers, so the planner only asks for
/// schemas through this trait.
pub trait SchemaSource: Send + Sync {
    fn schema_for(&self, resource_type: &str) -> Option<ProviderSchema>;
}

/// Schema source that knows no provider; nothing forces replacement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchemas;

impl SchemaSource for NoSchemas {
    fn schema_for(&self, _resource_type: &str) -> Option<ProviderSchema> {
        None
    }
}

impl SchemaSource for HashMap<String, ProviderSchema> {
    fn schema_for(&self, resource_type: &str) -> Option<ProviderSchema> {
        self.get(resource_type).cloned()
    }
}

/// Registry of resource providers and job runners, indexed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<BoxResourceProvider>>,
    runners: HashMap<String, Arc<BoxJobRunner>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register_provider<T: ResourceProvider + 'static>(&mut self, provider: T) {
        let provider = BoxResourceProvider::new(provider);
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    /// Register a job runner under its own name, replacing any previous one.
    pub fn register_runner<T: JobRunner + 'static>(&mut self, runner: T) {
        let runner = BoxJobRunner::new(runner);
        self.runners.insert(runner.name().to_string(), Arc::new(runner));
    }

    pub fn provider(&self, resource_type: &str) -> Option<Arc<BoxResourceProvider>> {
        self.providers.get(resource_type).cloned()
    }

    pub fn runner(&self, name: &str) -> Option<Arc<BoxJobRunner>> {
        self.runners.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Registered runner names, sorted.
    pub fn runner_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runners.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl SchemaSource for ProviderRegistry {
    fn schema_for(&self, resource_type: &str) -> Option<ProviderSchema> {
        self.providers.get(resource_type).map(|p| p.schema())
    }
}
