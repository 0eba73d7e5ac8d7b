//! Run configuration.

pub mod options;

pub use options::{RunOptions, RunOptionsBuilder};
