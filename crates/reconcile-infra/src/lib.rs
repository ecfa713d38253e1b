//! Infrastructure layer for the reconcile engine.
//!
//! Contains implementations of the ports defined in `reconcile-core`: the
//! file and SQLite state stores, the bundled resource providers and job
//! runner, plus loaders for `reconcile.toml` and declaration files.

pub mod config;
pub mod declarations;
pub mod fs;
pub mod hash;
pub mod provider;
pub mod runner;
pub mod sqlite;
pub mod state;

use reconcile_core::provider::ProviderRegistry;

/// Registry with every bundled provider and runner registered.
pub fn builtin_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_provider(provider::NullProvider::new());
    registry.register_provider(provider::LocalFileProvider::new());
    registry.register_runner(runner::CommandJobRunner::new());
    registry
}
