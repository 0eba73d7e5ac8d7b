//! Check that an image works with file transfer.

use super::ToolImage;
use crate::provenance::CommandLog;
use cincan_shared::errors::{CincanError, CincanResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const IN_FILE: &str = "cincan-in/cincan.txt";
const OUT_FILE: &str = "cincan-out/cincan.txt";
const TEST_DATA: &str = "This is a test";
const CHECK_ENTRYPOINT: &str = "/usr/bin/env";

/// Copies a file through the container and verifies it comes back.
///
/// The verdict is appended to the buffered stdout of the returned log.
pub struct ContainerCheck<'t> {
    tool: &'t mut ToolImage,
}

impl<'t> ContainerCheck<'t> {
    pub fn new(tool: &'t mut ToolImage) -> Self {
        Self { tool }
    }

    /// Run `args`, or the default copy command when empty.
    pub fn run(&mut self, args: &[String]) -> CincanResult<CommandLog> {
        let host_dir = self.tool.host_dir().to_path_buf();
        let in_file = host_dir.join(IN_FILE);
        let out_file = host_dir.join(OUT_FILE);

        let args = if args.is_empty() {
            vec!["cp".to_string(), IN_FILE.to_string(), OUT_FILE.to_string()]
        } else {
            args.to_vec()
        };
        let saved = {
            let options = self.tool.options_mut();
            let saved = (options.entrypoint.take(), options.buffer_output);
            options.entrypoint = Some(CHECK_ENTRYPOINT.to_string());
            options.buffer_output = true;
            saved
        };

        let outcome = prepare(&in_file, &out_file).and_then(|_| {
            let log = self
                .tool
                .run_with(&args, None, &mut io::sink(), &mut io::sink())?;
            let copied = fs::read_to_string(&out_file).ok();
            Ok((log, copied))
        });
        cleanup(&[in_file, out_file]);
        {
            let options = self.tool.options_mut();
            (options.entrypoint, options.buffer_output) = saved;
        }
        let (mut log, copied) = outcome?;

        let verdict = if log.exit_code != 0 {
            format!("Test failed, exit code {}\n", log.exit_code)
        } else {
            match copied.as_deref() {
                None | Some("") => "Test failed, test file not copied\n".to_string(),
                Some(TEST_DATA) => "Test pass\n".to_string(),
                Some(_) => "Test failed, test data not copied properly\n".to_string(),
            }
        };
        let stdout = log.stdout.get_or_insert_with(Vec::new);
        if !stdout.is_empty() && !stdout.ends_with(b"\n") {
            stdout.push(b'\n');
        }
        stdout.extend_from_slice(verdict.as_bytes());
        Ok(log)
    }
}

fn prepare(in_file: &Path, out_file: &Path) -> CincanResult<()> {
    for file in [in_file, out_file] {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CincanError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
    }
    if out_file.exists() {
        fs::remove_file(out_file).map_err(|e| {
            CincanError::Storage(format!("Failed to remove {}: {}", out_file.display(), e))
        })?;
    }
    fs::write(in_file, TEST_DATA)
        .map_err(|e| CincanError::Storage(format!("Failed to write {}: {}", in_file.display(), e)))
}

/// Remove the scratch files and their directories, ignoring what is gone.
fn cleanup(files: &[PathBuf]) {
    for file in files {
        if file.exists() && fs::remove_file(file).is_err() {
            debug!("could not remove {}", file.display());
        }
        if let Some(parent) = file.parent()
            && parent.exists()
            && fs::remove_dir(parent).is_err()
        {
            debug!("could not remove {}", parent.display());
        }
    }
}
