//! Bundled job runners.

pub mod command;

pub use command::CommandJobRunner;
