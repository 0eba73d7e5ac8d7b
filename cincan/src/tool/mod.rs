//! Tool image - runs one command in a fresh container with file transfer.

// ============================================================================
// IMPORTS
// ============================================================================

mod check;

pub use check::ContainerCheck;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cincan_shared::constants::files::STDIO_MARKER;
use cincan_shared::errors::{CincanError, CincanResult};
use tracing::{debug, info, warn};

use crate::archive::{DownloadOptions, OutputSink, TarTool, UploadStats};
use crate::container::{Container, ContainerRuntime, ContainerSpec, ImageHandle};
use crate::exec::{self, ExecIo, ExecOptions, StdinSource, stdin_is_tty};
use crate::files::{FileResolver, ResolveOptions, UploadEntry};
use crate::provenance::{CommandLog, FileLog};
use crate::runtime::RunOptions;
use crate::util::{quote_args, short_id};

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Shared reference to a container runtime.
pub type SharedRuntime = Arc<dyn ContainerRuntime>;

// ============================================================================
// TOOL IMAGE
// ============================================================================

/// A command line tool packaged as a container image.
///
/// Every run creates a new container: detected input files are uploaded,
/// the command streams its output, changed files are downloaded, and the
/// container is removed. The result is a [`CommandLog`].
pub struct ToolImage {
    runtime: SharedRuntime,
    image: ImageHandle,
    /// Name recorded as the first element of the logged command.
    name: String,
    options: RunOptions,
    /// Host directory relative paths resolve against.
    host_dir: PathBuf,

    // --- Filled by the last run ---
    upload_files: Vec<String>,
    download_files: Vec<String>,
}

/// Host streams for one run.
struct HostIo<'a> {
    stdin: Option<&'a mut dyn StdinSource>,
    stdout: &'a mut dyn Write,
    stderr: &'a mut dyn Write,
    raw_terminal: bool,
}

impl ToolImage {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Look up `image` through `runtime`; files resolve against `host_dir`.
    pub fn new(runtime: SharedRuntime, image: &str, host_dir: impl Into<PathBuf>) -> CincanResult<Self> {
        let handle = runtime.image(image)?;
        debug!("image {} id {} workdir {}", image, handle.id, handle.work_dir());
        Ok(Self {
            runtime,
            name: image.to_string(),
            image: handle,
            options: RunOptions::default(),
            host_dir: host_dir.into(),
            upload_files: Vec::new(),
            download_files: Vec::new(),
        })
    }

    /// Use the current working directory as the host directory.
    pub fn in_current_dir(runtime: SharedRuntime, image: &str) -> CincanResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| CincanError::Config(format!("Failed to read current directory: {}", e)))?;
        Self::new(runtime, image, cwd)
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &ImageHandle {
        &self.image
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut RunOptions {
        &mut self.options
    }

    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    /// Host paths uploaded by the last run, sorted, as detected.
    pub fn upload_files(&self) -> &[String] {
        &self.upload_files
    }

    /// Files downloaded by the last run, sorted, relative to the host directory.
    ///
    /// Standard streams are not included.
    pub fn download_files(&self) -> &[String] {
        &self.download_files
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Run the tool, streaming its output to the process stdout and stderr.
    pub fn run(&mut self, args: &[String]) -> CincanResult<CommandLog> {
        self.options.buffer_output = false;
        self.run_host(args)
    }

    /// Run the tool and return its stdout followed by its stderr.
    pub fn run_get_string(&mut self, args: &[String]) -> CincanResult<String> {
        self.options.buffer_output = true;
        let log = self.run_host(args)?;
        Ok(log_output(&log))
    }

    /// Run the tool with caller supplied streams.
    ///
    /// `stdin` is forwarded only when the options ask for interactive input.
    /// The host terminal is left alone.
    pub fn run_with(
        &mut self,
        args: &[String],
        stdin: Option<&mut dyn StdinSource>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> CincanResult<CommandLog> {
        self.run_inner(
            args,
            HostIo {
                stdin: stdin.map(|s| s as &mut dyn StdinSource),
                stdout,
                stderr,
                raw_terminal: false,
            },
        )
    }

    fn run_host(&mut self, args: &[String]) -> CincanResult<CommandLog> {
        let raw_terminal = self.options.tty && self.options.interactive;
        if raw_terminal && !stdin_is_tty() {
            return Err(CincanError::Terminal(
                "The input device is not a TTY. Did you pipe input when -it enabled?".into(),
            ));
        }
        let mut stdin = if self.options.interactive {
            Some(exec::host_stdin()?)
        } else {
            None
        };
        let mut stdout = io::stdout();
        let mut stderr = io::stderr();
        self.run_inner(
            args,
            HostIo {
                stdin: stdin.as_mut().map(|s| s as &mut dyn StdinSource),
                stdout: &mut stdout,
                stderr: &mut stderr,
                raw_terminal,
            },
        )
    }

    fn run_inner(&mut self, args: &[String], io: HostIo<'_>) -> CincanResult<CommandLog> {
        self.options.validate()?;

        let resolver = FileResolver::resolve(
            args,
            &self.host_dir,
            &ResolveOptions {
                output_dirs: self.options.output_dirs.clone(),
                input_filters: self.options.input_matchers(),
                detect: self.options.input_tar.is_none(),
            },
        );
        let uploads = resolver.upload_entries();
        for entry in &uploads {
            debug!("{} -> {}", entry.host.display(), entry.arc_name);
        }
        let cmd_args = resolver.command_args().to_vec();
        debug!("args: {}", quote_args(&cmd_args).join(" "));

        let spec = self.container_spec(cmd_args.clone());
        let user_cmd = if cmd_args.is_empty() {
            self.image.cmd.clone()
        } else {
            cmd_args
        };
        let mut command = Vec::with_capacity(user_cmd.len() + 1);
        command.push(self.name.clone());
        command.extend(user_cmd);

        let mut container = self.runtime.create(&spec)?;
        info!("container {} created", short_id(container.id()));

        let result = self.drive(container.as_mut(), &uploads, command, io);

        debug!("killing the container");
        if let Err(e) = container.kill() {
            debug!("kill: {}", e);
        }
        if let Err(e) = container.remove() {
            warn!("Failed to remove container {}: {}", short_id(container.id()), e);
        }

        let log = result?;
        self.upload_files = resolver
            .host_files()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.upload_files.sort();
        self.download_files = self.relative_outputs(&log.out_files);
        Ok(log)
    }

    /// Upload, execute, and download for one created container.
    fn drive(
        &self,
        container: &mut dyn Container,
        uploads: &[UploadEntry],
        command: Vec<String>,
        io: HostIo<'_>,
    ) -> CincanResult<CommandLog> {
        let mut stats = UploadStats::new();
        let in_files = {
            let tar_tool = TarTool::new(&*container, &self.image, &self.host_dir);
            let mut in_files = match self.options.input_tar.as_deref() {
                Some(path) => {
                    let reader = self.open_input_tar(path)?;
                    tar_tool.upload_tar(reader, &mut stats)?
                }
                None => Vec::new(),
            };
            in_files.extend(tar_tool.upload(uploads, &mut stats)?);
            in_files
        };

        let HostIo {
            stdin,
            stdout,
            stderr,
            raw_terminal,
        } = io;
        let write_stdout = !self.options.is_stdout_tar();
        let exec_options = ExecOptions {
            tty: self.options.tty,
            interactive: self.options.interactive,
            buffer_output: self.options.buffer_output,
            write_stdout,
            raw_terminal,
            wait_timeout: self.options.wait_timeout(),
        };
        let outcome = exec::execute(
            container,
            command,
            &exec_options,
            ExecIo {
                stdin: stdin.map(|s| s as &mut dyn StdinSource),
                stdout: &mut *stdout,
                stderr,
            },
        )?;
        let mut log = outcome.log;
        log.in_files.extend(in_files);

        if log.exit_code == 0 || outcome.interrupted {
            let tar_tool = TarTool::new(&*container, &self.image, &self.host_dir);
            let download = DownloadOptions {
                filters: self.options.output_matchers(),
                no_defaults: self.options.no_defaults,
                output_paths: self.options.output_dirs.clone(),
                implicit_output: self.options.implicit_output,
            };
            let out_files = match self.options.output_tar.as_deref() {
                Some(STDIO_MARKER) => tar_tool.download(&download, &stats, OutputSink::Tar(stdout))?,
                Some(path) => {
                    let mut file = File::create(path).map_err(|e| {
                        CincanError::Transfer(format!("Failed to create {}: {}", path, e))
                    })?;
                    tar_tool.download(&download, &stats, OutputSink::Tar(&mut file))?
                }
                None => tar_tool.download(&download, &stats, OutputSink::Host)?,
            };
            log.out_files.extend(out_files);
        }
        Ok(log)
    }

    fn container_spec(&self, cmd: Vec<String>) -> ContainerSpec {
        let options = &self.options;
        if let Some(network) = &options.network {
            debug!("option network={}", network);
        }
        if let Some(user) = &options.user {
            debug!("option user={}", user);
        }
        if !options.cap_add.is_empty() {
            debug!("option cap-add={}", options.cap_add.join(","));
        }
        if !options.cap_drop.is_empty() {
            debug!("option cap-drop={}", options.cap_drop.join(","));
        }
        if let Some(runtime) = &options.runtime {
            debug!("option runtime={}", runtime);
        }
        ContainerSpec {
            image: self.image.id.clone(),
            cmd,
            entrypoint: options.entrypoint.as_ref().map(|e| vec![e.clone()]),
            tty: options.tty,
            open_stdin: options.interactive,
            network_mode: options.network.clone(),
            user: options.user.clone(),
            cap_add: options.cap_add.clone(),
            cap_drop: options.cap_drop.clone(),
            runtime: options.runtime.clone(),
        }
    }

    fn open_input_tar(&self, path: &str) -> CincanResult<Box<dyn Read>> {
        if path == STDIO_MARKER {
            return Ok(Box::new(io::stdin().lock()));
        }
        let file = File::open(path)
            .map_err(|e| CincanError::Transfer(format!("Failed to open input tar {}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    fn relative_outputs(&self, out_files: &[FileLog]) -> Vec<String> {
        let mut files: Vec<String> = out_files
            .iter()
            .filter(|f| !f.path.starts_with("/dev/"))
            .map(|f| {
                f.path
                    .strip_prefix(&self.host_dir)
                    .unwrap_or(&f.path)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.sort();
        files
    }
}

/// Buffered stdout followed by buffered stderr, lossily decoded.
pub fn log_output(log: &CommandLog) -> String {
    let mut out = String::new();
    if let Some(stdout) = &log.stdout {
        out.push_str(&String::from_utf8_lossy(stdout));
    }
    if let Some(stderr) = &log.stderr {
        out.push_str(&String::from_utf8_lossy(stderr));
    }
    out
}
