//! Records of one tool execution.

use crate::util::quote_args;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Timestamp layout of persisted logs.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

mod timestamp {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&text, TIME_FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::TIME_FORMAT;
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_str(&v.format(TIME_FORMAT).to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(text) => NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// A file read or written by a command, identified by content digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLog {
    pub path: PathBuf,
    /// Hex SHA-256, empty for non-regular files.
    #[serde(rename = "sha256")]
    pub digest: String,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<NaiveDateTime>,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One execution: argv, exit code and the files that went in and out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    /// Tool name followed by its arguments.
    pub command: Vec<String>,
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    pub exit_code: i64,
    #[serde(
        default,
        rename = "input",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub in_files: Vec<FileLog>,
    #[serde(
        default,
        rename = "output",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub out_files: Vec<FileLog>,
    /// Buffered stream contents, only when output buffering is on.
    #[serde(skip)]
    pub stdin: Option<Vec<u8>>,
    #[serde(skip)]
    pub stdout: Option<Vec<u8>>,
    #[serde(skip)]
    pub stderr: Option<Vec<u8>>,
}

impl CommandLog {
    /// New log stamped with the current local time.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timestamp: Local::now().naive_local(),
            exit_code: 0,
            in_files: Vec::new(),
            out_files: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Command line as a single printable string.
    pub fn command_string(&self) -> String {
        quote_args(&self.command).join(" ")
    }

    /// Serialize to the persisted JSON layout.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
