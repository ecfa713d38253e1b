//! Engine: everything between declarations and applied state.
//!
//! - `graph` -- declarations to a validated dependency DAG
//! - `scheduler` -- Kahn's algorithm, grouped into parallel waves
//! - `diff` -- structural attribute diff
//! - `planner` -- state diff to an ordered plan
//! - `retry` -- backoff and per-call timeouts
//! - `executor` -- wave-based parallel apply
//! - `reconcile` -- recovery of interrupted provider mutations
//! - `orchestrator` -- build, plan and apply with phase tracking

pub mod diff;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

pub use executor::{ExecuteOptions, Executor, ExecutorError};
pub use graph::{Graph, GraphError};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use planner::{PlanError, plan};
pub use scheduler::{SchedulerError, Wave, schedule, schedule_plan};
