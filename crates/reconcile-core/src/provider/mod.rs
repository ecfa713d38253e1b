//! Plugin ports: resource providers and job runners.
//!
//! - `resource` -- `ResourceProvider` trait and its object-safe box
//! - `job` -- `JobRunner` trait and its object-safe box
//! - `registry` -- name-indexed lookup and provider schemas

pub mod job;
pub mod registry;
pub mod resource;

pub use job::{BoxJobRunner, JobOutput, JobRunner, JobSpec};
pub use registry::{NoSchemas, ProviderRegistry, SchemaSource};
pub use resource::{Applied, BoxResourceProvider, ProviderSchema, ResourceProvider, ResourceRequest};
