//! Constants shared between the engine, the CLI and test helpers.

/// Files and directories the engine reads or writes by name.
pub mod files {
    /// Per-image ignore file, read from the container working directory.
    pub const IGNORE_FILE: &str = ".cincanignore";

    /// Pseudo path recorded for data fed to the container stdin.
    pub const DEV_STDIN: &str = "/dev/stdin";

    /// Pseudo path recorded for container stdout.
    pub const DEV_STDOUT: &str = "/dev/stdout";

    /// Pseudo path recorded for container stderr.
    pub const DEV_STDERR: &str = "/dev/stderr";

    /// Value of an input/output tar option meaning stdin/stdout.
    pub const STDIO_MARKER: &str = "-";
}

/// Attach stream framing used by the daemon when TTY is off.
pub mod stream {
    /// Size of the frame header: tag, 3 reserved bytes, 4-byte BE length.
    pub const FRAME_HEADER_LEN: usize = 8;

    /// Stream tag for stdin frames (never sent by the daemon in practice).
    pub const TAG_STDIN: u8 = 0;

    pub const TAG_STDOUT: u8 = 1;

    pub const TAG_STDERR: u8 = 2;

    /// Read buffer for stdin and TTY socket chunks.
    pub const BUFFER_SIZE: usize = 1024 * 1024;
}

/// Exit codes synthesized by the engine rather than by the tool.
pub mod exit_codes {
    /// The container could not be started (matches `docker run`).
    pub const START_FAILURE: i64 = 125;

    /// The container did not report an exit status within the wait timeout.
    pub const WAIT_TIMEOUT: i64 = 124;

    /// Streaming was interrupted and the container was killed.
    pub const INTERRUPTED: i64 = 130;
}
