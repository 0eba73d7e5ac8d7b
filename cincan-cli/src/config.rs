//! User configuration read from `<home>/config.json`.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

const CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CliConfig {
    /// Persist a command log for every successful run.
    #[serde(default)]
    pub command_log: bool,
}

impl CliConfig {
    /// Load the configuration, defaults when the file does not exist.
    pub fn load(home: &Path) -> anyhow::Result<Self> {
        let path = home.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let home = tempfile::tempdir().unwrap();
        assert!(!CliConfig::load(home.path()).unwrap().command_log);
    }

    #[test]
    fn test_command_log_and_unknown_keys() {
        let home = tempfile::tempdir().unwrap();
        fs::write(
            home.path().join(CONFIG_FILE),
            r#"{"command_log": true, "show_updates": false}"#,
        )
        .unwrap();
        assert!(CliConfig::load(home.path()).unwrap().command_log);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(CONFIG_FILE), "{").unwrap();
        assert!(CliConfig::load(home.path()).is_err());
    }
}
