//! cincan engine
//!
//! Runs command line tools in throwaway containers. Host files named on the
//! command line are uploaded into the container, output files are brought
//! back, and every run can be recorded as a [`CommandLog`] for provenance
//! queries.

pub mod archive;
pub mod container;
pub mod exec;
pub mod files;
pub mod provenance;
pub mod runtime;
pub mod tool;
pub mod util;

pub use cincan_shared::errors::{CincanError, CincanResult};
pub use container::{Container, ContainerRuntime, DockerRuntime, ImageHandle};
pub use provenance::{CommandLog, FileLog};
pub use runtime::RunOptions;
pub use tool::{ContainerCheck, SharedRuntime, ToolImage};
