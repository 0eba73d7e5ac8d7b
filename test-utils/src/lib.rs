//! In-memory container runtime for cincan integration tests.
//!
//! [`FakeRuntime`] implements the engine's container traits without a
//! daemon. Each container has its own filesystem map that tracks changes the
//! way `docker diff` does, serves archives the way `docker cp` does, and runs
//! a Rust closure as its "tool" on a thread wired to the attach socket.

mod fs;
mod tools;

pub use fs::{FakeFs, Node, NodeKind};
pub use tools::busybox;

use cincan::container::{
    ArchiveFetch, AttachOptions, AttachStream, Container, ContainerChange, ContainerRuntime,
    ContainerSpec, ImageHandle,
};
use cincan::exec::encode_frame;
use cincan_shared::constants::stream::{TAG_STDERR, TAG_STDOUT};
use cincan_shared::errors::{CincanError, CincanResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Exit code reported for a killed container.
pub const KILLED_EXIT_CODE: i64 = 137;

/// Body of a fake tool. Returns the exit code.
pub type ToolFn = Arc<dyn Fn(&mut ToolContext<'_>) -> i64 + Send + Sync>;

/// What a running fake tool can see and do.
pub struct ToolContext<'a> {
    argv: Vec<String>,
    work_dir: String,
    tty: bool,
    fs: &'a Mutex<FakeFs>,
    stdin: Option<UnixStream>,
    output: Option<&'a mut UnixStream>,
}

impl ToolContext<'_> {
    /// Entrypoint followed by the command.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    /// Absolute container path for `path`, relative ones against the work dir.
    pub fn path(&self, path: &str) -> String {
        if path.starts_with('/') {
            fs::normalize(path)
        } else {
            fs::normalize(&format!("{}/{}", self.work_dir, path))
        }
    }

    pub fn stdout(&mut self, data: &[u8]) {
        self.emit(TAG_STDOUT, data);
    }

    pub fn stderr(&mut self, data: &[u8]) {
        self.emit(TAG_STDERR, data);
    }

    fn emit(&mut self, tag: u8, data: &[u8]) {
        let tty = self.tty;
        if let Some(out) = self.output.as_mut() {
            let bytes = if tty { data.to_vec() } else { encode_frame(tag, data) };
            let _ = out.write_all(&bytes);
        }
    }

    /// Everything written to stdin until the host closes it.
    pub fn read_stdin(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        if let Some(stdin) = self.stdin.as_mut() {
            let _ = stdin.read_to_end(&mut data);
        }
        data
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let path = self.path(path);
        self.fs.lock().read(&path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = self.path(path);
        self.fs.lock().is_dir(&path)
    }

    pub fn write_file(&self, path: &str, data: &[u8]) {
        let path = self.path(path);
        self.fs.lock().write(&path, data.to_vec(), unix_now());
    }

    pub fn mkdir(&self, path: &str) {
        let path = self.path(path);
        self.fs.lock().mkdir(&path, unix_now());
    }

    pub fn remove(&self, path: &str) -> bool {
        let path = self.path(path);
        self.fs.lock().remove(&path)
    }
}

struct FakeImage {
    handle: ImageHandle,
    tool: ToolFn,
}

#[derive(Default)]
struct RuntimeState {
    images: BTreeMap<String, FakeImage>,
    /// Files present in every new container, outside the change list.
    seed: Vec<(String, Vec<u8>)>,
    start_error: Option<String>,
    created: Vec<ContainerSpec>,
    filesystems: Vec<Arc<Mutex<FakeFs>>>,
    removed: usize,
    next_id: u64,
}

/// Container runtime backed by memory. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime with the [`busybox`] image working in `/work`.
    pub fn busybox() -> Self {
        Self::new().with_image(busybox_image("/work"), busybox)
    }

    pub fn with_image<F>(self, handle: ImageHandle, tool: F) -> Self
    where
        F: Fn(&mut ToolContext<'_>) -> i64 + Send + Sync + 'static,
    {
        let tool: ToolFn = Arc::new(tool);
        self.state.lock().images.insert(
            handle.name.clone(),
            FakeImage { handle, tool },
        );
        self
    }

    /// Put a file into every container created from now on.
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state.lock().seed.push((path.to_string(), data.to_vec()));
        self
    }

    /// Make every start fail with `message`.
    pub fn fail_start(self, message: &str) -> Self {
        self.state.lock().start_error = Some(message.to_string());
        self
    }

    /// Specs of all created containers, oldest first.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().created.clone()
    }

    pub fn removed(&self) -> usize {
        self.state.lock().removed
    }

    /// Filesystem of the most recently created container.
    pub fn last_fs(&self) -> Option<Arc<Mutex<FakeFs>>> {
        self.state.lock().filesystems.last().cloned()
    }
}

/// Image handle of the stock test image.
pub fn busybox_image(work_dir: &str) -> ImageHandle {
    ImageHandle {
        name: "busybox".into(),
        id: "sha256:0b1a8e4f6d2c".into(),
        working_dir: work_dir.into(),
        entrypoint: Vec::new(),
        cmd: vec!["echo".into(), "busybox".into()],
        tags: vec!["busybox:latest".into()],
    }
}

impl ContainerRuntime for FakeRuntime {
    fn image(&self, name: &str) -> CincanResult<ImageHandle> {
        self.state
            .lock()
            .images
            .get(name)
            .map(|image| image.handle.clone())
            .ok_or_else(|| CincanError::NotFound(format!("No such image: {}", name)))
    }

    fn create(&self, spec: &ContainerSpec) -> CincanResult<Box<dyn Container>> {
        let mut state = self.state.lock();
        let image = state
            .images
            .values()
            .find(|image| image.handle.id == spec.image || image.handle.name == spec.image)
            .ok_or_else(|| CincanError::NotFound(format!("No such image: {}", spec.image)))?;
        let handle = image.handle.clone();
        let tool = Arc::clone(&image.tool);

        let mut fs = FakeFs::new();
        fs.seed_dir(&handle.work_dir(), 0);
        for (path, data) in &state.seed {
            let path = if path.starts_with('/') {
                path.clone()
            } else {
                format!("{}{}", handle.work_dir(), path)
            };
            fs.seed_file(&path, data.clone(), 0);
        }
        let fs = Arc::new(Mutex::new(fs));

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.created.push(spec.clone());
        state.filesystems.push(Arc::clone(&fs));

        Ok(Box::new(FakeContainer {
            id,
            spec: spec.clone(),
            image: handle,
            tool,
            fs,
            start_error: state.start_error.clone(),
            runtime: Arc::clone(&self.state),
            socket: None,
            exit: Arc::new(Mutex::new(None)),
        }))
    }
}

struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    image: ImageHandle,
    tool: ToolFn,
    fs: Arc<Mutex<FakeFs>>,
    start_error: Option<String>,
    runtime: Arc<Mutex<RuntimeState>>,
    /// Container end of the attach socket.
    socket: Option<UnixStream>,
    exit: Arc<Mutex<Option<i64>>>,
}

impl FakeContainer {
    fn argv(&self) -> Vec<String> {
        let mut argv = self
            .spec
            .entrypoint
            .clone()
            .unwrap_or_else(|| self.image.entrypoint.clone());
        if self.spec.cmd.is_empty() {
            argv.extend(self.image.cmd.iter().cloned());
        } else {
            argv.extend(self.spec.cmd.iter().cloned());
        }
        argv
    }
}

impl Container for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn attach(&mut self, _options: AttachOptions) -> CincanResult<Box<dyn AttachStream>> {
        let (host, container) = UnixStream::pair()
            .map_err(|e| CincanError::Container(format!("socketpair failed: {}", e)))?;
        self.socket = Some(container);
        Ok(Box::new(host))
    }

    fn start(&mut self) -> CincanResult<()> {
        if let Some(message) = &self.start_error {
            return Err(CincanError::Container(message.clone()));
        }
        let argv = self.argv();
        let work_dir = self.image.work_dir().trim_end_matches('/').to_string();
        let work_dir = if work_dir.is_empty() { "/".to_string() } else { work_dir };
        let tty = self.spec.tty;
        let open_stdin = self.spec.open_stdin;
        let tool = Arc::clone(&self.tool);
        let fs = Arc::clone(&self.fs);
        let exit = Arc::clone(&self.exit);
        let socket = match &self.socket {
            Some(s) => Some(
                s.try_clone()
                    .map_err(|e| CincanError::Container(format!("clone failed: {}", e)))?,
            ),
            None => None,
        };

        thread::spawn(move || {
            let mut output = socket;
            let stdin = if open_stdin {
                output.as_ref().and_then(|s| s.try_clone().ok())
            } else {
                None
            };
            let code = {
                let mut ctx = ToolContext {
                    argv,
                    work_dir,
                    tty,
                    fs: &fs,
                    stdin,
                    output: output.as_mut(),
                };
                tool(&mut ctx)
            };
            exit.lock().get_or_insert(code);
            if let Some(s) = output {
                let _ = s.shutdown(Shutdown::Both);
            }
        });
        Ok(())
    }

    fn diff(&self) -> CincanResult<Vec<ContainerChange>> {
        Ok(self.fs.lock().changes())
    }

    fn get_archive(&self, path: &str) -> CincanResult<ArchiveFetch> {
        let fs = self.fs.lock();
        match fs.archive(path)? {
            Some((stat, data)) => Ok(ArchiveFetch::Found {
                stat,
                stream: Box::new(std::io::Cursor::new(data)),
            }),
            None => Ok(ArchiveFetch::NotFound),
        }
    }

    fn put_archive(&self, path: &str, tar: &[u8]) -> CincanResult<()> {
        self.fs.lock().extract(path, tar)
    }

    fn wait(&self, timeout: Duration) -> CincanResult<Option<i64>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = *self.exit.lock() {
                return Ok(Some(code));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn kill(&self) -> CincanResult<()> {
        self.exit.lock().get_or_insert(KILLED_EXIT_CODE);
        if let Some(s) = &self.socket {
            let _ = s.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn remove(&self) -> CincanResult<()> {
        self.runtime.lock().removed += 1;
        Ok(())
    }
}

/// Seconds since the epoch.
pub fn unix_now() -> i64 {
    cincan::util::unix_now()
}
