#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Scratch home and working directory for one CLI invocation.
pub struct TestContext {
    pub home: TempDir,
    pub work: TempDir,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_cincan");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        cmd.current_dir(self.work.path());
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("CINCAN_HOME");
        cmd.arg("--home").arg(self.home.path());
        cmd
    }

    pub fn work_path(&self, name: &str) -> String {
        self.work.path().join(name).to_string_lossy().into_owned()
    }

    pub fn write_work(&self, name: &str, data: &str) {
        fs::write(self.work.path().join(name), data).expect("write work file");
    }

    /// Store a raw JSON command log under a fixed user id.
    pub fn write_log(&self, user: &str, name: &str, json: &str) {
        let dir = self.home.path().join("shared").join(user).join("logs");
        fs::create_dir_all(&dir).expect("create log dir");
        fs::write(dir.join(name), json).expect("write log");
    }

    pub fn home_path(&self) -> &Path {
        self.home.path()
    }
}

pub fn cincan() -> TestContext {
    TestContext {
        home: TempDir::new().expect("home dir"),
        work: TempDir::new().expect("work dir"),
    }
}
