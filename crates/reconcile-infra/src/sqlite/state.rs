//! SQLite state store implementation.
//!
//! Implements `StateStore` from `reconcile-core` with sqlx and split
//! read/write pools. Attributes, outputs and dependency lists are stored as
//! JSON text. A record write and the matching intent removal share one
//! transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reconcile_core::repository::StateStore;
use reconcile_types::error::StateError;
use reconcile_types::node::Attributes;
use reconcile_types::plan::Operation;
use reconcile_types::state::{PendingIntent, StateRecord};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StateStore`.
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn backend(e: sqlx::Error) -> StateError {
    StateError::Backend(e.to_string())
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> Result<T, StateError> {
    serde_json::from_str(text)
        .map_err(|e| StateError::Corruption(format!("invalid JSON in column '{column}': {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StateError> {
    serde_json::to_string(value).map_err(|e| StateError::Serialization(e.to_string()))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::Corruption(format!("invalid datetime: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<StateRecord, StateError> {
    let attributes: String = row.try_get("attributes").map_err(backend)?;
    let outputs: String = row.try_get("outputs").map_err(backend)?;
    let dependencies: String = row.try_get("dependencies").map_err(backend)?;
    let serial: i64 = row.try_get("serial").map_err(backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend)?;

    Ok(StateRecord {
        node_id: row.try_get("node_id").map_err(backend)?,
        resource_type: row.try_get("resource_type").map_err(backend)?,
        attributes: decode_json::<Attributes>("attributes", &attributes)?,
        identity: row.try_get("identity").map_err(backend)?,
        outputs: decode_json::<BTreeMap<String, serde_json::Value>>("outputs", &outputs)?,
        dependencies: decode_json::<Vec<String>>("dependencies", &dependencies)?,
        serial: serial as u64,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn intent_from_row(row: &SqliteRow) -> Result<PendingIntent, StateError> {
    let operation: String = row.try_get("operation").map_err(backend)?;
    let attributes: String = row.try_get("attributes").map_err(backend)?;
    let resolved: String = row.try_get("resolved").map_err(backend)?;
    let dependencies: String = row.try_get("dependencies").map_err(backend)?;
    let previous_serial: i64 = row.try_get("previous_serial").map_err(backend)?;
    let started_at: String = row.try_get("started_at").map_err(backend)?;

    Ok(PendingIntent {
        node_id: row.try_get("node_id").map_err(backend)?,
        resource_type: row.try_get("resource_type").map_err(backend)?,
        operation: operation.parse::<Operation>().map_err(StateError::Corruption)?,
        identity: row.try_get("identity").map_err(backend)?,
        attributes: decode_json::<Attributes>("attributes", &attributes)?,
        resolved: decode_json("resolved", &resolved)?,
        dependencies: decode_json("dependencies", &dependencies)?,
        previous_serial: previous_serial as u64,
        started_at: parse_datetime(&started_at)?,
    })
}

// ---------------------------------------------------------------------------
// StateStore implementation
// ---------------------------------------------------------------------------

impl StateStore for SqliteStateStore {
    async fn load(&self, node_id: &str) -> Result<Option<StateRecord>, StateError> {
        let row = sqlx::query("SELECT * FROM state_records WHERE node_id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(backend)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        let attributes = encode_json(&record.attributes)?;
        let outputs = encode_json(&record.outputs)?;
        let dependencies = encode_json(&record.dependencies)?;

        let mut tx = self.pool.writer.begin().await.map_err(backend)?;
        sqlx::query(
            r#"INSERT INTO state_records
                   (node_id, resource_type, attributes, identity, outputs, dependencies, serial, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (node_id) DO UPDATE SET
                   resource_type = excluded.resource_type,
                   attributes = excluded.attributes,
                   identity = excluded.identity,
                   outputs = excluded.outputs,
                   dependencies = excluded.dependencies,
                   serial = excluded.serial,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&record.node_id)
        .bind(&record.resource_type)
        .bind(&attributes)
        .bind(&record.identity)
        .bind(&outputs)
        .bind(&dependencies)
        .bind(record.serial as i64)
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM pending_intents WHERE node_id = ?")
            .bind(&record.node_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn delete(&self, node_id: &str) -> Result<(), StateError> {
        let mut tx = self.pool.writer.begin().await.map_err(backend)?;
        for table in ["state_records", "pending_intents"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE node_id = ?"))
                .bind(node_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn list(&self) -> Result<Vec<StateRecord>, StateError> {
        let rows = sqlx::query("SELECT * FROM state_records ORDER BY node_id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn record_intent(&self, intent: &PendingIntent) -> Result<(), StateError> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO pending_intents
                   (node_id, resource_type, operation, identity, attributes, resolved,
                    dependencies, previous_serial, started_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&intent.node_id)
        .bind(&intent.resource_type)
        .bind(intent.operation.to_string())
        .bind(&intent.identity)
        .bind(encode_json(&intent.attributes)?)
        .bind(encode_json(&intent.resolved)?)
        .bind(encode_json(&intent.dependencies)?)
        .bind(intent.previous_serial as i64)
        .bind(intent.started_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn clear_intent(&self, node_id: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM pending_intents WHERE node_id = ?")
            .bind(node_id)
            .execute(&self.pool.writer)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn pending_intents(&self) -> Result<Vec<PendingIntent>, StateError> {
        let rows = sqlx::query("SELECT * FROM pending_intents ORDER BY node_id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(backend)?;

        rows.iter().map(intent_from_row).collect()
    }
}
