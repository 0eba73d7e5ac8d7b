//! Raw mode for the controlling terminal.

use cincan_shared::errors::{CincanError, CincanResult};
use nix::sys::termios::{self, SetArg, Termios};
use std::io::IsTerminal;
use std::os::fd::{AsFd, BorrowedFd};
use tracing::{debug, warn};

/// Is standard input a terminal.
pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

/// Puts a terminal into raw mode and restores the saved settings on drop.
///
/// Raw mode passes keystrokes such as Ctrl-C straight to the container.
pub struct RawTerminal {
    fd: BorrowedFd<'static>,
    saved: Termios,
}

impl RawTerminal {
    /// Enable raw mode on standard input.
    pub fn stdin() -> CincanResult<Self> {
        // SAFETY: fd 0 stays open for the life of the process
        let fd = unsafe { BorrowedFd::borrow_raw(0) };
        Self::enable(fd)
    }

    pub fn enable(fd: BorrowedFd<'static>) -> CincanResult<Self> {
        let saved = termios::tcgetattr(fd.as_fd()).map_err(|e| {
            CincanError::Terminal(format!(
                "The input device is not a TTY. Did you pipe input when -it enabled? ({})",
                e
            ))
        })?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &raw)
            .map_err(|e| CincanError::Terminal(format!("Failed to enable raw mode: {}", e)))?;
        debug!("Raw mode for terminal enabled.");
        Ok(Self { fd, saved })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.fd.as_fd(), SetArg::TCSADRAIN, &self.saved) {
            warn!("Failed to restore terminal settings: {}", e);
        } else {
            debug!("Terminal settings restored.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_non_tty_rejected() {
        let (a, _b) = UnixStream::pair().unwrap();
        // a socket is never a terminal, leaking it keeps the fd valid for 'static
        let a: &'static UnixStream = Box::leak(Box::new(a));
        let err = RawTerminal::enable(a.as_fd()).err().unwrap();
        assert!(matches!(err, CincanError::Terminal(_)));
    }
}
