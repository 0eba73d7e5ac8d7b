//! Configuration for one tool run.

use crate::files::FileMatcher;
use cincan_shared::constants::files::STDIO_MARKER;
use cincan_shared::errors::{CincanError, CincanResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Run Options
// ============================================================================

/// Everything a caller can tune about running a tool.
///
/// The engine never parses flags itself; the CLI maps its arguments onto
/// this struct. Filters are kept in their user-facing syntax (`^` prefix for
/// excludes) so the options stay serializable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOptions {
    /// Tar providing the container working directory contents.
    ///
    /// `-` reads the tar from stdin. Disables file detection in arguments.
    #[serde(default)]
    pub input_tar: Option<String>,

    /// Write downloaded files to this tar instead of the host filesystem.
    ///
    /// `-` writes the tar to stdout; tool stdout is then only hashed.
    #[serde(default)]
    pub output_tar: Option<String>,

    /// Directories created in the container and always collected back.
    #[serde(default)]
    pub output_dirs: Vec<String>,

    /// Patterns pruning the detected input files.
    #[serde(default)]
    pub input_filters: Vec<String>,

    /// Patterns selecting the output files.
    #[serde(default)]
    pub output_filters: Vec<String>,

    /// Ignore the `.cincanignore` shipped in the image.
    #[serde(default)]
    pub no_defaults: bool,

    /// Collect files from the container change list.
    ///
    /// When false only `output_dirs` are downloaded.
    /// Default: true
    #[serde(default = "default_implicit_output")]
    pub implicit_output: bool,

    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub cap_add: Vec<String>,

    #[serde(default)]
    pub cap_drop: Vec<String>,

    /// OCI runtime for the container (`docker run --runtime`).
    #[serde(default)]
    pub runtime: Option<String>,

    /// Allocate a pseudo terminal.
    #[serde(default)]
    pub tty: bool,

    /// Forward host stdin to the tool.
    #[serde(default)]
    pub interactive: bool,

    /// Replace the image entrypoint.
    #[serde(default)]
    pub entrypoint: Option<String>,

    /// Keep tool output in the returned log instead of writing it out.
    #[serde(default)]
    pub buffer_output: bool,

    /// Seconds to wait for the exit status after the streams close.
    ///
    /// Default: 60
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_implicit_output() -> bool {
    true
}

fn default_wait_timeout_secs() -> u64 {
    60
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            input_tar: None,
            output_tar: None,
            output_dirs: Vec::new(),
            input_filters: Vec::new(),
            output_filters: Vec::new(),
            no_defaults: false,
            implicit_output: default_implicit_output(),
            network: None,
            user: None,
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            runtime: None,
            tty: false,
            interactive: false,
            entrypoint: None,
            buffer_output: false,
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

impl RunOptions {
    /// Create a builder for customizing run options.
    ///
    /// # Example
    ///
    /// ```
    /// use cincan::runtime::options::RunOptions;
    ///
    /// let options = RunOptions::builder()
    ///     .output_dir("results")
    ///     .output_filter("^*.log")
    ///     .build();
    /// assert_eq!(options.output_dirs, vec!["results"]);
    /// ```
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::new()
    }

    /// Reject combinations that cannot work together.
    pub fn validate(&self) -> CincanResult<()> {
        if self.input_tar.is_some() && !self.input_filters.is_empty() {
            return Err(CincanError::Config(
                "Input filters cannot be used with an input tar".into(),
            ));
        }
        if self.is_stdin_tar() && self.interactive {
            return Err(CincanError::Config(
                "Stdin cannot carry both the input tar and interactive input".into(),
            ));
        }
        Ok(())
    }

    pub fn input_matchers(&self) -> Vec<FileMatcher> {
        FileMatcher::parse(&self.input_filters)
    }

    pub fn output_matchers(&self) -> Vec<FileMatcher> {
        FileMatcher::parse(&self.output_filters)
    }

    /// Input tar is read from stdin.
    pub fn is_stdin_tar(&self) -> bool {
        self.input_tar.as_deref() == Some(STDIO_MARKER)
    }

    /// Output tar goes to stdout.
    pub fn is_stdout_tar(&self) -> bool {
        self.output_tar.as_deref() == Some(STDIO_MARKER)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

// ============================================================================
// Run Options Builder
// ============================================================================

/// Builder for [`RunOptions`].
#[derive(Debug, Clone, Default)]
pub struct RunOptionsBuilder {
    inner: RunOptions,
}

impl RunOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_tar(&mut self, path: impl Into<String>) -> &mut Self {
        self.inner.input_tar = Some(path.into());
        self
    }

    pub fn output_tar(&mut self, path: impl Into<String>) -> &mut Self {
        self.inner.output_tar = Some(path.into());
        self
    }

    pub fn output_dir(&mut self, dir: impl Into<String>) -> &mut Self {
        self.inner.output_dirs.push(dir.into());
        self
    }

    pub fn input_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.inner.input_filters.push(filter.into());
        self
    }

    pub fn output_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.inner.output_filters.push(filter.into());
        self
    }

    pub fn no_defaults(&mut self, enabled: bool) -> &mut Self {
        self.inner.no_defaults = enabled;
        self
    }

    pub fn implicit_output(&mut self, enabled: bool) -> &mut Self {
        self.inner.implicit_output = enabled;
        self
    }

    pub fn network(&mut self, network: impl Into<String>) -> &mut Self {
        self.inner.network = Some(network.into());
        self
    }

    pub fn user(&mut self, user: impl Into<String>) -> &mut Self {
        self.inner.user = Some(user.into());
        self
    }

    pub fn cap_add(&mut self, cap: impl Into<String>) -> &mut Self {
        self.inner.cap_add.push(cap.into());
        self
    }

    pub fn cap_drop(&mut self, cap: impl Into<String>) -> &mut Self {
        self.inner.cap_drop.push(cap.into());
        self
    }

    pub fn runtime(&mut self, runtime: impl Into<String>) -> &mut Self {
        self.inner.runtime = Some(runtime.into());
        self
    }

    pub fn tty(&mut self, enabled: bool) -> &mut Self {
        self.inner.tty = enabled;
        self
    }

    pub fn interactive(&mut self, enabled: bool) -> &mut Self {
        self.inner.interactive = enabled;
        self
    }

    pub fn entrypoint(&mut self, entrypoint: impl Into<String>) -> &mut Self {
        self.inner.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn buffer_output(&mut self, enabled: bool) -> &mut Self {
        self.inner.buffer_output = enabled;
        self
    }

    pub fn wait_timeout_secs(&mut self, secs: u64) -> &mut Self {
        self.inner.wait_timeout_secs = secs;
        self
    }

    pub fn build(&self) -> RunOptions {
        self.inner.clone()
    }
}
