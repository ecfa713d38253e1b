//! Shared domain types for the reconcile engine.
//!
//! This crate contains the data model used across the workspace:
//! declarations and attribute values, persisted state records, plans,
//! run reports, engine configuration and the error types that cross
//! crate boundaries.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod node;
pub mod plan;
pub mod run;
pub mod state;
