//! Tar based file transfer between host and container.
//!
//! Uploads are a single tar put into the container working directory.
//! Downloads start from the container change list, filter it, and fetch
//! only what changed since upload (see [`UploadStats::is_changed`]).

mod download;
mod ignore;
mod stats;
mod upload;

pub use download::{DownloadOptions, OutputSink};
pub use ignore::{merge_filters, parse_ignore_file};
pub use stats::{UploadStat, UploadStats};

use crate::container::{Container, ImageHandle};
use std::path::{Path, PathBuf};

/// Moves files in and out of one container.
pub struct TarTool<'c> {
    container: &'c dyn Container,
    /// Container working directory, always ending with `/`.
    work_dir: String,
    /// Host directory relative archive names map to.
    host_dir: PathBuf,
}

impl<'c> TarTool<'c> {
    pub fn new(container: &'c dyn Container, image: &ImageHandle, host_dir: &Path) -> Self {
        Self {
            container,
            work_dir: image.work_dir(),
            host_dir: host_dir.to_path_buf(),
        }
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    /// Working directory without the trailing slash, `/` stays `/`.
    fn work_dir_path(&self) -> &str {
        if self.work_dir.len() > 1 {
            self.work_dir.trim_end_matches('/')
        } else {
            &self.work_dir
        }
    }

    /// Container path to its name relative to the working directory.
    fn relative_name<'p>(&self, container_path: &'p str) -> Option<&'p str> {
        container_path.strip_prefix(self.work_dir.as_str())
    }

    /// Host location for a path relative to the working directory.
    fn host_path(&self, relative: &str) -> PathBuf {
        self.host_dir.join(relative.replace(':', "_"))
    }
}

/// Entry name as it appears in a tar, without `./` and trailing slashes.
fn clean_entry_name(name: &str) -> &str {
    let name = name.strip_prefix("./").unwrap_or(name);
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() { name } else { trimmed }
}

/// Parent of a container path (`/a/b` -> `/a`, `/a` -> `/`).
fn container_parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join_container(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
