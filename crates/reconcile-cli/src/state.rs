//! Application state wiring config, state store and providers together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reconcile_core::engine::{ExecuteOptions, Orchestrator};
use reconcile_core::provider::ProviderRegistry;
use reconcile_infra::builtin_registry;
use reconcile_infra::config::{data_dir, load_engine_config, state_path};
use reconcile_infra::state::{AnyStateStore, open_state_store};
use reconcile_types::config::EngineConfig;

/// Everything a command needs.
pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub store: Arc<AnyStateStore>,
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    /// Load `reconcile.toml` from `config_path` and open the configured
    /// state store.
    pub async fn init(config_path: &Path) -> anyhow::Result<Self> {
        let config = load_engine_config(config_path).await;
        let data_dir = data_dir();
        let store = open_state_store(&config, &data_dir).await?;

        tracing::debug!(
            data_dir = %data_dir.display(),
            state = %state_path(&config, &data_dir).display(),
            concurrency = config.concurrency,
            "application state ready"
        );

        Ok(Self {
            config,
            data_dir,
            store: Arc::new(store),
            registry: Arc::new(builtin_registry()),
        })
    }

    pub fn orchestrator(&self) -> Orchestrator<AnyStateStore> {
        Orchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            ExecuteOptions::from(&self.config),
        )
    }

    pub fn state_location(&self) -> PathBuf {
        state_path(&self.config, &self.data_dir)
    }
}
