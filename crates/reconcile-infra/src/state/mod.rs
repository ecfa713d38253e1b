//! State store selection.
//!
//! [`AnyStateStore`] wraps the configured backend so the CLI can hold one
//! concrete type regardless of `state.backend`.

pub mod file;

use std::path::Path;

use reconcile_core::repository::StateStore;
use reconcile_types::config::{EngineConfig, StateBackendKind};
use reconcile_types::error::StateError;
use reconcile_types::state::{PendingIntent, StateRecord};

pub use file::FileStateStore;

use crate::config::state_path;
use crate::sqlite::{DatabasePool, SqliteStateStore};

/// The state store named by the engine configuration.
pub enum AnyStateStore {
    File(FileStateStore),
    Sqlite(SqliteStateStore),
}

/// Open the backend configured in `config`, resolving relative locations
/// against `data_dir`.
pub async fn open_state_store(config: &EngineConfig, data_dir: &Path) -> Result<AnyStateStore, StateError> {
    let path = state_path(config, data_dir);
    tracing::debug!(backend = ?config.state.backend, path = %path.display(), "opening state store");

    match config.state.backend {
        StateBackendKind::File => Ok(AnyStateStore::File(FileStateStore::open(path).await?)),
        StateBackendKind::Sqlite => {
            let pool = DatabasePool::open(&path)
                .await
                .map_err(|e| StateError::Backend(format!("failed to open {}: {e}", path.display())))?;
            Ok(AnyStateStore::Sqlite(SqliteStateStore::new(pool)))
        }
    }
}

impl StateStore for AnyStateStore {
    async fn load(&self, node_id: &str) -> Result<Option<StateRecord>, StateError> {
        match self {
            Self::File(s) => s.load(node_id).await,
            Self::Sqlite(s) => s.load(node_id).await,
        }
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        match self {
            Self::File(s) => s.save(record).await,
            Self::Sqlite(s) => s.save(record).await,
        }
    }

    async fn delete(&self, node_id: &str) -> Result<(), StateError> {
        match self {
            Self::File(s) => s.delete(node_id).await,
            Self::Sqlite(s) => s.delete(node_id).await,
        }
    }

    async fn list(&self) -> Result<Vec<StateRecord>, StateError> {
        match self {
            Self::File(s) => s.list().await,
            Self::Sqlite(s) => s.list().await,
        }
    }

    async fn record_intent(&self, intent: &PendingIntent) -> Result<(), StateError> {
        match self {
            Self::File(s) => s.record_intent(intent).await,
            Self::Sqlite(s) => s.record_intent(intent).await,
        }
    }

    async fn clear_intent(&self, node_id: &str) -> Result<(), StateError> {
        match self {
            Self::File(s) => s.clear_intent(node_id).await,
            Self::Sqlite(s) => s.clear_intent(node_id).await,
        }
    }

    async fn pending_intents(&self) -> Result<Vec<PendingIntent>, StateError> {
        match self {
            Self::File(s) => s.pending_intents().await,
            Self::Sqlite(s) => s.pending_intents().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_each_backend() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = EngineConfig::default();
        let store = open_state_store(&config, dir.path()).await.unwrap();
        assert!(matches!(store, AnyStateStore::File(_)));
        assert!(store.list().await.unwrap().is_empty());

        config.state.backend = StateBackendKind::Sqlite;
        let store = open_state_store(&config, dir.path()).await.unwrap();
        assert!(matches!(store, AnyStateStore::Sqlite(_)));
        assert!(store.pending_intents().await.unwrap().is_empty());
        assert!(dir.path().join("state.db").exists());
    }
}
