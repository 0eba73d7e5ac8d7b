//! cincan shared code
//!
//! Error type and constants used by the engine (cincan), the command line
//! frontend (cincan-cli) and the test helpers.

pub mod constants;
pub mod errors;

pub use errors::{CincanError, CincanResult};
