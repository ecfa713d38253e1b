//! JSON file state store.
//!
//! The whole state lives in one document:
//!
//! ```json
//! { "version": 1, "serial": 7, "checksum": "<sha256>", "records": {..}, "intents": {..} }
//! ```
//!
//! Every mutation rewrites the document through [`atomic_write`], so a crash
//! leaves either the previous or the next document. The checksum covers
//! `records` and `intents`; a mismatch means the file was torn or edited by
//! hand and is reported as [`StateError::Corruption`].
//!
//! The document is read once on open and cached. Only one process may
//! write a given state file at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reconcile_core::repository::StateStore;
use reconcile_types::error::StateError;
use reconcile_types::state::{PendingIntent, StateRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::fs::atomic_write;
use crate::hash::sha256_hex;

/// Current document format.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Contents {
    #[serde(default)]
    records: BTreeMap<String, StateRecord>,
    #[serde(default)]
    intents: BTreeMap<String, PendingIntent>,
}

impl Contents {
    fn checksum(&self) -> Result<String, StateError> {
        let payload = serde_json::to_vec(self).map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(sha256_hex(&payload))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    serial: u64,
    checksum: String,
    #[serde(flatten)]
    contents: Contents,
}

#[derive(Debug, Default)]
struct Snapshot {
    serial: u64,
    contents: Contents,
}

/// [`StateStore`] persisted as a single checksummed JSON file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl FileStateStore {
    /// Open the state file at `path`. A missing file is an empty state; it
    /// is created on the first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => decode(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no state file yet, starting empty");
                Snapshot::default()
            }
            Err(e) => return Err(StateError::Io(e)),
        };

        tracing::debug!(
            path = %path.display(),
            serial = snapshot.serial,
            records = snapshot.contents.records.len(),
            "opened state file"
        );
        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of writes the file has seen.
    pub async fn serial(&self) -> u64 {
        self.snapshot.lock().await.serial
    }

    /// Apply `change` to a copy of the contents, write it out, and only then
    /// make it visible to readers.
    async fn mutate<F>(&self, change: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Contents),
    {
        let mut snapshot = self.snapshot.lock().await;
        let mut next = snapshot.contents.clone();
        change(&mut next);

        let serial = snapshot.serial + 1;
        let bytes = encode(serial, &next)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
            .await
            .map_err(|e| StateError::Backend(format!("state write task failed: {e}")))??;

        snapshot.serial = serial;
        snapshot.contents = next;
        Ok(())
    }
}

fn encode(serial: u64, contents: &Contents) -> Result<Vec<u8>, StateError> {
    let document = Document {
        version: STATE_FORMAT_VERSION,
        serial,
        checksum: contents.checksum()?,
        contents: contents.clone(),
    };
    serde_json::to_vec_pretty(&document).map_err(|e| StateError::Serialization(e.to_string()))
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Snapshot, StateError> {
    let document: Document = serde_json::from_slice(bytes).map_err(|e| {
        StateError::Corruption(format!("{} is not a valid state document: {e}", path.display()))
    })?;

    if document.version > STATE_FORMAT_VERSION {
        return Err(StateError::Corruption(format!(
            "{} has format version {}, newest supported is {STATE_FORMAT_VERSION}",
            path.display(),
            document.version
        )));
    }

    let actual = document.contents.checksum()?;
    if actual != document.checksum {
        return Err(StateError::Corruption(format!(
            "{} checksum mismatch (expected {}, found {actual})",
            path.display(),
            document.checksum
        )));
    }

    Ok(Snapshot {
        serial: document.serial,
        contents: document.contents,
    })
}

impl StateStore for FileStateStore {
    async fn load(&self, node_id: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(self.snapshot.lock().await.contents.records.get(node_id).cloned())
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        self.mutate(|c| {
            c.intents.remove(&record.node_id);
            c.records.insert(record.node_id.clone(), record.clone());
        })
        .await
    }

    async fn delete(&self, node_id: &str) -> Result<(), StateError> {
        self.mutate(|c| {
            c.intents.remove(node_id);
            c.records.remove(node_id);
        })
        .await
    }

    async fn list(&self) -> Result<Vec<StateRecord>, StateError> {
        Ok(self.snapshot.lock().await.contents.records.values().cloned().collect())
    }

    async fn record_intent(&self, intent: &PendingIntent) -> Result<(), StateError> {
        self.mutate(|c| {
            c.intents.insert(intent.node_id.clone(), intent.clone());
        })
        .await
    }

    async fn clear_intent(&self, node_id: &str) -> Result<(), StateError> {
        self.mutate(|c| {
            c.intents.remove(node_id);
        })
        .await
    }

    async fn pending_intents(&self) -> Result<Vec<PendingIntent>, StateError> {
        Ok(self.snapshot.lock().await.contents.intents.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reconcile_types::node::{AttrValue, Attributes};
    use reconcile_types::plan::Operation;
    use tempfile::TempDir;

    use super::*;

    fn record(id: &str) -> StateRecord {
        StateRecord {
            node_id: id.to_string(),
            resource_type: "null".to_string(),
            attributes: Attributes::from([("size".to_string(), AttrValue::literal(2.5))]),
            identity: format!("{id}-1"),
            outputs: BTreeMap::from([("ip".to_string(), serde_json::json!("10.0.0.1"))]),
            dependencies: vec!["network".to_string()],
            serial: 1,
            updated_at: Utc::now(),
        }
    }

    fn intent(id: &str) -> PendingIntent {
        PendingIntent {
            node_id: id.to_string(),
            resource_type: "null".to_string(),
            operation: Operation::Create,
            identity: None,
            attributes: Attributes::new(),
            resolved: BTreeMap::new(),
            dependencies: vec![],
            previous_serial: 0,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path().join("state.json")).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.serial().await, 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let web = record("web");

        let store = FileStateStore::open(&path).await.unwrap();
        store.save(&web).await.unwrap();
        store.save(&record("db")).await.unwrap();
        store.delete("db").await.unwrap();
        drop(store);

        let reopened = FileStateStore::open(&path).await.unwrap();
        assert_eq!(reopened.serial().await, 3);
        assert_eq!(reopened.load("web").await.unwrap(), Some(web));
        assert!(reopened.load("db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_clears_intent_durably() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::open(&path).await.unwrap();
        store.record_intent(&intent("web")).await.unwrap();
        store.record_intent(&intent("api")).await.unwrap();
        store.save(&record("web")).await.unwrap();
        drop(store);

        let reopened = FileStateStore::open(&path).await.unwrap();
        let pending: Vec<String> = reopened
            .pending_intents()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.node_id)
            .collect();
        assert_eq!(pending, vec!["api"]);
    }

    #[tokio::test]
    async fn test_hand_edited_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::open(&path).await.unwrap();
        store.save(&record("web")).await.unwrap();
        drop(store);

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("web-1", "web-2")).unwrap();

        let err = FileStateStore::open(&path).await.unwrap_err();
        assert!(err.is_corruption(), "got {err}");
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_truncated_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::open(&path).await.unwrap();
        store.save(&record("web")).await.unwrap();
        drop(store);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(FileStateStore::open(&path).await.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_newer_format_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let empty = Contents::default();
        let doc = serde_json::json!({
            "version": STATE_FORMAT_VERSION + 1,
            "serial": 1,
            "checksum": empty.checksum().unwrap(),
            "records": {},
            "intents": {},
        });
        std::fs::write(&path, doc.to_string()).unwrap();

        let err = FileStateStore::open(&path).await.unwrap_err();
        assert!(err.to_string().contains("format version"));
    }
}
