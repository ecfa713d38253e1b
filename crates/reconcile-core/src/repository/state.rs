//! State store trait definition.
//!
//! The state store owns every [`StateRecord`] and the intent journal. The
//! executor and the planner only reach state through this trait; the
//! infrastructure layer (reconcile-infra) implements it with a JSON file
//! and with SQLite.

use reconcile_types::error::StateError;
use reconcile_types::state::{PendingIntent, StateRecord};

/// Persistence for last-applied resource state.
///
/// Implementations must make every mutation durable before returning and
/// must never leave a partially written record behind: a crash mid-write
/// leaves either the old or the new content.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Load the record for a node. Returns `None` if the node was never applied.
    fn load(
        &self,
        node_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StateRecord>, StateError>> + Send;

    /// Insert or replace a record. Clears any pending intent for the same
    /// node in the same write.
    fn save(
        &self,
        record: &StateRecord,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// Remove a record and any pending intent for the node. No-op if absent.
    fn delete(
        &self,
        node_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// All records, sorted by node ID.
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<StateRecord>, StateError>> + Send;

    // -----------------------------------------------------------------------
    // Intent journal
    // -----------------------------------------------------------------------

    /// Record that a provider mutation is about to start. Replaces any
    /// existing intent for the node.
    fn record_intent(
        &self,
        intent: &PendingIntent,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// Drop the intent for a node without touching its record.
    fn clear_intent(
        &self,
        node_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// Intents left behind by interrupted runs, sorted by node ID.
    fn pending_intents(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PendingIntent>, StateError>> + Send;
}
