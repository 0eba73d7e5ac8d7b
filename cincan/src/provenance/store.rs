//! On-disk command log store.
//!
//! Layout under the home directory:
//!
//! ```text
//! <home>/uid.txt                         per-user id, created on first write
//! <home>/shared/<uid>/logs/<ulid>.json   one CommandLog per execution
//! ```
//!
//! Logs of every user found under `shared/` are read back by
//! [`CommandLogIndex::load`], so a shared directory synchronized between
//! users gives a combined history.

use super::log::CommandLog;
use cincan_shared::errors::{CincanError, CincanResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ulid::Ulid;
use uuid::Uuid;

const UID_FILE: &str = "uid.txt";
const SHARED_DIR: &str = "shared";
const LOGS_DIR: &str = "logs";

/// Root of the log directory tree.
#[derive(Clone, Debug)]
pub struct LogStore {
    home: PathBuf,
}

impl LogStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.home.join(SHARED_DIR)
    }

    /// The user id, generated and persisted when missing.
    pub fn uid(&self) -> CincanResult<String> {
        let path = self.home.join(UID_FILE);
        if path.is_file() {
            let text = fs::read_to_string(&path).map_err(|e| {
                CincanError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let uid = text.trim();
            if !uid.is_empty() {
                return Ok(uid.to_string());
            }
        }

        let uid = Uuid::new_v4().to_string();
        fs::create_dir_all(&self.home).map_err(|e| {
            CincanError::Storage(format!(
                "Failed to create directory {}: {}",
                self.home.display(),
                e
            ))
        })?;
        fs::write(&path, &uid).map_err(|e| {
            CincanError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        debug!(uid = %uid, "generated user id");
        Ok(uid)
    }

    /// Directory holding this user's logs.
    pub fn log_dir(&self) -> CincanResult<PathBuf> {
        Ok(self.shared_dir().join(self.uid()?).join(LOGS_DIR))
    }
}

/// Persists command logs into a [`LogStore`].
#[derive(Clone, Debug)]
pub struct CommandLogWriter {
    store: LogStore,
}

impl CommandLogWriter {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }

    /// Write `log` as a new file, returning its path.
    pub fn write(&self, log: &CommandLog) -> CincanResult<PathBuf> {
        let dir = self.store.log_dir()?;
        fs::create_dir_all(&dir).map_err(|e| {
            CincanError::Storage(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;
        let path = dir.join(format!("{}.json", Ulid::new()));
        let json = log.to_json()?;
        fs::write(&path, json).map_err(|e| {
            CincanError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "command log written");
        Ok(path)
    }
}

/// All known command logs, most recent first.
#[derive(Clone, Debug, Default)]
pub struct CommandLogIndex {
    logs: Vec<CommandLog>,
}

impl CommandLogIndex {
    /// Read every user's logs from the store.
    pub fn load(store: &LogStore) -> CincanResult<Self> {
        let shared = store.shared_dir();
        let mut logs = Vec::new();
        if !shared.is_dir() {
            return Ok(Self::from_logs(logs));
        }

        let users = fs::read_dir(&shared).map_err(|e| {
            CincanError::Storage(format!("Failed to list {}: {}", shared.display(), e))
        })?;
        for user in users.flatten() {
            let log_dir = user.path().join(LOGS_DIR);
            let Ok(entries) = fs::read_dir(&log_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|text| CommandLog::from_json(&text).map_err(|e| e.to_string()))
                {
                    Ok(log) => logs.push(log),
                    Err(e) => warn!("Skipping unreadable log {}: {}", path.display(), e),
                }
            }
        }
        Ok(Self::from_logs(logs))
    }

    /// Build an index from logs in any order.
    pub fn from_logs(mut logs: Vec<CommandLog>) -> Self {
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self { logs }
    }

    pub fn logs(&self) -> &[CommandLog] {
        &self.logs
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}
