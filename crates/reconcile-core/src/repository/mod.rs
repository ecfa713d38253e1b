//! State store port and the in-memory adapter.
//!
//! Durable adapters (JSON file, SQLite) live in reconcile-infra.

pub mod memory;
pub mod state;

pub use memory::MemoryStateStore;
pub use state::StateStore;
