//! Configuration for the task runtime and worker pool.

pub mod runtime;

pub use runtime::{RuntimeConfig, ENV_PREFIX};
