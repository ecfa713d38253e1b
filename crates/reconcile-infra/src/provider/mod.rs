//! Bundled resource providers.
//!
//! - `null`: bookkeeping-only resources, useful for wiring and tests
//! - `local_file`: a file on the local filesystem

pub mod local_file;
pub mod null;

pub use local_file::LocalFileProvider;
pub use null::NullProvider;
