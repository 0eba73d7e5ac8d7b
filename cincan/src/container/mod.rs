//! Narrow container lifecycle interface.
//!
//! The engine never talks to a daemon directly; everything goes through
//! [`ContainerRuntime`] and [`Container`]. [`docker::DockerRuntime`] is the
//! production implementation, the test helpers provide an in-memory one.

pub mod docker;

use cincan_shared::CincanResult;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub use docker::DockerRuntime;

/// An image that is already present locally.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageHandle {
    /// Name the user asked for (`repo:tag`).
    pub name: String,
    pub id: String,
    /// `Config.WorkingDir` of the image, `/` when unset.
    pub working_dir: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub tags: Vec<String>,
}

impl ImageHandle {
    /// Working directory with a trailing slash, as used for path prefix tests.
    pub fn work_dir(&self) -> String {
        let mut dir = if self.working_dir.is_empty() {
            "/".to_string()
        } else {
            self.working_dir.clone()
        };
        if !dir.ends_with('/') {
            dir.push('/');
        }
        dir
    }
}

/// Everything `create` needs to know.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    /// Command arguments; empty keeps the image `Cmd`.
    pub cmd: Vec<String>,
    /// Entrypoint override; `None` keeps the image entrypoint.
    pub entrypoint: Option<Vec<String>>,
    pub tty: bool,
    pub open_stdin: bool,
    pub network_mode: Option<String>,
    pub user: Option<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub runtime: Option<String>,
}

/// Which standard streams to attach to.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

/// One entry of the container filesystem change listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerChange {
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

impl ChangeKind {
    /// Map the daemon's numeric change kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ChangeKind::Added,
            2 => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        }
    }
}

/// Stat of a container path as reported alongside an archive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    /// Modification time, whole seconds since the epoch.
    pub mtime: i64,
}

/// Result of fetching an archive of a container path.
pub enum ArchiveFetch {
    Found {
        stat: PathStat,
        /// Tar stream with the path itself as the first entry.
        stream: Box<dyn Read + Send>,
    },
    NotFound,
}

impl std::fmt::Debug for ArchiveFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFetch::Found { stat, .. } => f.debug_struct("Found").field("stat", stat).finish(),
            ArchiveFetch::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Duplex byte stream returned by attach.
///
/// Must expose a file descriptor so the exec loop can poll it.
pub trait AttachStream: Read + Write + AsFd + Send {
    /// Half-close the write side, signalling EOF on the container stdin.
    fn shutdown_write(&self) -> io::Result<()>;

    /// Bytes are readable without touching the descriptor, so `poll` would
    /// not report them.
    fn has_buffered(&self) -> bool {
        false
    }
}

impl AttachStream for UnixStream {
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }
}

/// Creates containers from images.
pub trait ContainerRuntime {
    /// Look up a locally available image.
    fn image(&self, name: &str) -> CincanResult<ImageHandle>;

    fn create(&self, spec: &ContainerSpec) -> CincanResult<Box<dyn Container>>;
}

/// A created container.
pub trait Container {
    fn id(&self) -> &str;

    fn attach(&mut self, options: AttachOptions) -> CincanResult<Box<dyn AttachStream>>;

    fn start(&mut self) -> CincanResult<()>;

    /// Paths changed since the container was created.
    fn diff(&self) -> CincanResult<Vec<ContainerChange>>;

    fn get_archive(&self, path: &str) -> CincanResult<ArchiveFetch>;

    /// Extract `tar` into directory `path` of the container.
    fn put_archive(&self, path: &str, tar: &[u8]) -> CincanResult<()>;

    /// Wait for the container to exit; `None` when `timeout` elapsed first.
    fn wait(&self, timeout: Duration) -> CincanResult<Option<i64>>;

    fn kill(&self) -> CincanResult<()>;

    fn remove(&self) -> CincanResult<()>;
}
