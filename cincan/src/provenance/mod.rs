//! Content-addressed execution records and lineage queries.

mod digest;
mod inspector;
mod log;
mod store;

pub use digest::{StreamDigest, hash_file, hash_reader};
pub use inspector::{CommandDependency, CommandInspector, Direction, FileDependency};
pub use log::{CommandLog, FileLog, TIME_FORMAT};
pub use store::{CommandLogIndex, CommandLogWriter, LogStore};
