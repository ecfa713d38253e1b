//! Reconciliation engine core.
//!
//! This crate defines the ports (state store, resource provider, job runner)
//! that the infrastructure layer implements, and the engine that drives
//! them: graph building, scheduling, planning, execution and crash
//! reconciliation. It depends only on `reconcile-types` -- never on
//! `reconcile-infra` or any database/IO crate.

pub mod engine;
pub mod provider;
pub mod repository;
