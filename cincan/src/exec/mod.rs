//! Run a created container and stream its standard streams.
//!
//! Single threaded: one `poll(2)` loop over the attach socket and, when
//! interactive, the host stdin. The container exit status comes from a
//! separate wait call after the stream closes.

mod frame;
mod stream;
mod terminal;

pub use frame::{StreamTag, encode_frame, read_frame};
pub use terminal::{RawTerminal, stdin_is_tty};

use crate::container::{AttachOptions, AttachStream, Container};
use crate::provenance::{CommandLog, FileLog};
use cincan_shared::constants::exit_codes::{INTERRUPTED, START_FAILURE, WAIT_TIMEOUT};
use cincan_shared::constants::files::{DEV_STDERR, DEV_STDIN, DEV_STDOUT};
use cincan_shared::constants::stream::BUFFER_SIZE;
use cincan_shared::errors::{CincanError, CincanResult};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use parking_lot::Mutex;
use signal_hook::SigId;
use signal_hook::consts::SIGINT;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stream::ToolStream;
use tracing::{debug, warn};

/// How long one poll may block before the interrupt flag is checked again.
const POLL_INTERVAL_MS: u16 = 250;

/// Readable, pollable input forwarded to the container stdin.
pub trait StdinSource: Read + AsFd {}

impl<T: Read + AsFd> StdinSource for T {}

/// Unbuffered handle on the process stdin.
///
/// `io::Stdin` buffers internally, which hides pending bytes from `poll`.
pub fn host_stdin() -> CincanResult<File> {
    let fd = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| CincanError::Terminal(format!("Failed to duplicate stdin: {}", e)))?;
    Ok(File::from(fd))
}

/// Behaviour switches of one execution.
#[derive(Clone, Debug)]
pub struct ExecOptions {
    pub tty: bool,
    /// Forward host stdin.
    pub interactive: bool,
    /// Collect streams in memory instead of writing them out.
    pub buffer_output: bool,
    /// `false` when stdout carries an output tar: tool stdout is only hashed.
    pub write_stdout: bool,
    /// Put the host terminal into raw mode for the duration (`-it`).
    pub raw_terminal: bool,
    pub wait_timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            tty: false,
            interactive: false,
            buffer_output: false,
            write_stdout: true,
            raw_terminal: false,
            wait_timeout: Duration::from_secs(60),
        }
    }
}

/// Host side of the standard streams.
pub struct ExecIo<'a> {
    pub stdin: Option<&'a mut dyn StdinSource>,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Result of [`execute`].
#[derive(Debug)]
pub struct ExecOutcome {
    pub log: CommandLog,
    /// Streaming stopped on SIGINT; the container has been killed.
    pub interrupted: bool,
}

enum LoopEnd {
    Closed,
    Interrupted,
}

/// Attach to `container`, start it, pump streams until it closes, and wait.
///
/// `command` is what gets recorded in the returned log.
pub fn execute(
    container: &mut dyn Container,
    command: Vec<String>,
    options: &ExecOptions,
    io: ExecIo<'_>,
) -> CincanResult<ExecOutcome> {
    let mut log = CommandLog::new(command);
    let ExecIo {
        stdin,
        stdout,
        stderr,
    } = io;
    let stdin = if options.interactive { stdin } else { None };

    debug!("exec tty={} interactive={}", options.tty, options.interactive);
    let mut socket = container.attach(AttachOptions {
        stdin: stdin.is_some(),
        stdout: true,
        stderr: true,
    })?;

    if let Err(e) = container.start() {
        warn!("Container start failed: {}", e);
        let message = format!("{}\n", e);
        if !options.buffer_output && let Err(e) = stderr.write_all(message.as_bytes()) {
            debug!("Failed to write start error: {}", e);
        }
        log.exit_code = START_FAILURE;
        log.stderr = Some(message.into_bytes());
        return Ok(ExecOutcome {
            log,
            interrupted: false,
        });
    }

    let mut stdin_s = ToolStream::new("stdin", None, options.buffer_output);
    let stdout_sink: Option<&mut dyn Write> = if options.write_stdout {
        Some(stdout)
    } else {
        None
    };
    let buffer_stdout = options.buffer_output && options.write_stdout;
    let mut stdout_s = ToolStream::new("stdout", stdout_sink, buffer_stdout);
    let mut stderr_s = ToolStream::new("stderr", Some(stderr), options.buffer_output);

    let raw = if options.raw_terminal {
        Some(RawTerminal::stdin()?)
    } else {
        None
    };
    let interrupted = Arc::new(AtomicBool::new(false));
    let sigint = SigintRoute::register(&interrupted)?;

    let pumped = pump(
        socket.as_mut(),
        stdin,
        options.tty,
        &interrupted,
        &mut stdin_s,
        &mut stdout_s,
        &mut stderr_s,
    );
    drop(sigint);
    drop(raw);
    drop(socket);
    let end = pumped?;

    let was_interrupted = matches!(end, LoopEnd::Interrupted);
    if was_interrupted {
        warn!("Interrupted, killing the container");
        if let Err(e) = container.kill() {
            warn!("Failed to kill the container: {}", e);
        }
    }

    log.exit_code = match container.wait(options.wait_timeout)? {
        Some(code) => code,
        None => {
            warn!(
                "Container did not exit within {:?}, killing it",
                options.wait_timeout
            );
            container.kill()?;
            WAIT_TIMEOUT
        }
    };
    if was_interrupted {
        log.exit_code = INTERRUPTED;
    }
    debug!("exit code {}", log.exit_code);

    if options.buffer_output {
        log.stdin = Some(stdin_s.take_raw().unwrap_or_default());
        log.stdout = Some(stdout_s.take_raw().unwrap_or_default());
        log.stderr = Some(stderr_s.take_raw().unwrap_or_default());
    }

    if log.exit_code == 0 {
        if !stdin_s.digest().is_empty() {
            log.in_files
                .push(FileLog::new(DEV_STDIN, stdin_s.digest().hex()));
        }
        if !stdout_s.digest().is_empty() {
            log.out_files
                .push(FileLog::new(DEV_STDOUT, stdout_s.digest().hex()));
        }
        if !stderr_s.digest().is_empty() {
            log.out_files
                .push(FileLog::new(DEV_STDERR, stderr_s.digest().hex()));
        }
    }

    Ok(ExecOutcome {
        log,
        interrupted: was_interrupted,
    })
}

struct SigintState {
    /// Read by the signal handler: when set, SIGINT terminates the process.
    idle: Arc<AtomicBool>,
    active: usize,
}

static SIGINT_STATE: Mutex<Option<SigintState>> = parking_lot::const_mutex(None);

/// Turns SIGINT into a flag while alive.
///
/// signal-hook never uninstalls its process handler, so a conditional
/// default action stays registered next to the flags and fires whenever no
/// route is active.
struct SigintRoute {
    id: SigId,
}

impl SigintRoute {
    fn register(flag: &Arc<AtomicBool>) -> CincanResult<Self> {
        let mut guard = SIGINT_STATE.lock();
        let state = match guard.as_mut() {
            Some(state) => state,
            None => {
                let idle = Arc::new(AtomicBool::new(true));
                signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&idle))
                    .map_err(|e| CincanError::Internal(format!("Failed to register SIGINT handler: {}", e)))?;
                guard.insert(SigintState { idle, active: 0 })
            }
        };
        let id = signal_hook::flag::register(SIGINT, Arc::clone(flag))
            .map_err(|e| CincanError::Internal(format!("Failed to register SIGINT handler: {}", e)))?;
        state.active += 1;
        state.idle.store(false, Ordering::SeqCst);
        Ok(Self { id })
    }
}

impl Drop for SigintRoute {
    fn drop(&mut self) {
        let mut guard = SIGINT_STATE.lock();
        signal_hook::low_level::unregister(self.id);
        if let Some(state) = guard.as_mut() {
            state.active = state.active.saturating_sub(1);
            if state.active == 0 {
                state.idle.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Whether SIGINT currently gets its default action.
fn sigint_is_default() -> bool {
    SIGINT_STATE
        .lock()
        .as_ref()
        .is_none_or(|state| state.idle.load(Ordering::SeqCst))
}

fn is_ready(flags: Option<PollFlags>) -> bool {
    flags.is_some_and(|f| f.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
}

#[allow(clippy::too_many_arguments)]
fn pump(
    socket: &mut dyn AttachStream,
    mut stdin: Option<&mut dyn StdinSource>,
    tty: bool,
    interrupted: &AtomicBool,
    stdin_s: &mut ToolStream<'_>,
    stdout_s: &mut ToolStream<'_>,
    stderr_s: &mut ToolStream<'_>,
) -> CincanResult<LoopEnd> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    debug!("enter stdin/container io loop...");

    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Ok(LoopEnd::Interrupted);
        }

        let buffered = socket.has_buffered();
        let (socket_ready, stdin_ready) = {
            let mut fds = vec![PollFd::new(socket.as_fd(), PollFlags::POLLIN)];
            if let Some(input) = stdin.as_ref() {
                fds.push(PollFd::new(input.as_fd(), PollFlags::POLLIN));
            }
            let timeout = if buffered {
                PollTimeout::ZERO
            } else {
                PollTimeout::from(POLL_INTERVAL_MS)
            };
            match poll(&mut fds, timeout) {
                Ok(0) if !buffered => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CincanError::Protocol(format!("poll failed: {}", e))),
            }
            (
                buffered || is_ready(fds[0].revents()),
                fds.get(1).is_some_and(|fd| is_ready(fd.revents())),
            )
        };

        if stdin_ready && let Some(input) = stdin.as_mut() {
            let n = match input.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CincanError::Terminal(format!("Failed to read stdin: {}", e))),
            };
            if n == 0 {
                debug!("received eof from stdin");
                stdin = None;
                socket
                    .shutdown_write()
                    .map_err(|e| CincanError::Protocol(format!("Failed to close stdin: {}", e)))?;
            } else {
                debug!("received {} bytes from stdin", n);
                stdin_s.accept(&buf[..n])?;
                socket
                    .write_all(&buf[..n])
                    .map_err(|e| CincanError::Protocol(format!("Failed to write stdin: {}", e)))?;
            }
        }

        if socket_ready {
            if tty {
                let n = match socket.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(CincanError::Protocol(format!(
                            "Failed to read from container: {}",
                            e
                        )));
                    }
                };
                if n == 0 {
                    debug!("received eof from container");
                    return Ok(LoopEnd::Closed);
                }
                stdout_s.accept(&buf[..n])?;
            } else {
                let Some((tag, data)) = read_frame(socket)? else {
                    debug!("received eof from container");
                    return Ok(LoopEnd::Closed);
                };
                match tag {
                    StreamTag::Stdout => {
                        debug!("received {} bytes from stdout", data.len());
                        stdout_s.accept(&data)?;
                    }
                    StreamTag::Stderr => {
                        debug!("received {} bytes from stderr", data.len());
                        stderr_s.accept(&data)?;
                    }
                    other => warn!("received {} bytes from {:?}, discarding", data.len(), other),
                }
            }
        }
    }
}
