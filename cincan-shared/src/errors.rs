//! Error types shared by the engine, the CLI and the test helpers.
//!
//! Variants are grouped by failure domain so callers can decide whether a
//! failure aborts the whole invocation or only one step of it.

use thiserror::Error;

/// Result alias used across all cincan crates.
pub type CincanResult<T> = Result<T, CincanError>;

#[derive(Debug, Error)]
pub enum CincanError {
    /// Container daemon refused or failed a lifecycle call.
    #[error("container: {0}")]
    Container(String),

    /// Moving files in or out of the container failed.
    #[error("transfer: {0}")]
    Transfer(String),

    /// A host path has the wrong type for the entry being downloaded
    /// (file where a directory is expected, or the other way around).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The attach stream violated the framing protocol.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Terminal could not be put into the requested mode.
    #[error("terminal: {0}")]
    Terminal(String),

    /// Local filesystem or log store failure.
    #[error("storage: {0}")]
    Storage(String),

    /// Invalid combination of user supplied options.
    #[error("config: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CincanError {
    fn from(err: serde_json::Error) -> Self {
        CincanError::Internal(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CincanError::Conflict("out.txt is a directory".into());
        assert_eq!(err.to_string(), "conflict: out.txt is a directory");

        let err = CincanError::Protocol("short frame".into());
        assert!(err.to_string().starts_with("protocol:"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CincanError = json_err.into();
        assert!(matches!(err, CincanError::Internal(_)));
    }
}
