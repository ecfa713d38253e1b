//! In-memory state store for tests and dry-run planning.

use std::collections::BTreeMap;

use reconcile_types::error::StateError;
use reconcile_types::state::{PendingIntent, StateRecord};
use tokio::sync::RwLock;

use super::state::StateStore;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, StateRecord>,
    intents: BTreeMap<String, PendingIntent>,
}

/// Non-durable [`StateStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records.
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.node_id.clone(), r))
            .collect();
        Self {
            inner: RwLock::new(Inner {
                records,
                intents: BTreeMap::new(),
            }),
        }
    }
}

impl StateStore for MemoryStateStore {
    async fn load(&self, node_id: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(self.inner.read().await.records.get(node_id).cloned())
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        inner.intents.remove(&record.node_id);
        inner.records.insert(record.node_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, node_id: &str) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        inner.intents.remove(node_id);
        inner.records.remove(node_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StateRecord>, StateError> {
        Ok(self.inner.read().await.records.values().cloned().collect())
    }

    async fn record_intent(&self, intent: &PendingIntent) -> Result<(), StateError> {
        self.inner
            .write()
            .await
            .intents
            .insert(intent.node_id.clone(), intent.clone());
        Ok(())
    }

    async fn clear_intent(&self, node_id: &str) -> Result<(), StateError> {
        self.inner.write().await.intents.remove(node_id);
        Ok(())
    }

    async fn pending_intents(&self) -> Result<Vec<PendingIntent>, StateError> {
        Ok(self.inner.read().await.intents.values().cloned().collect())
    }
}
