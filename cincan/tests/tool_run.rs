//! Integration tests for running tools against the in-memory runtime.

use cincan::container::ImageHandle;
use cincan::runtime::options::RunOptions;
use cincan::{CincanError, ContainerCheck, SharedRuntime, ToolImage};
use cincan_test_utils::{FakeRuntime, ToolContext, busybox_image};
use filetime::FileTime;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// 2020-01-01, far from any upload time.
const OLD_MTIME: i64 = 1_577_836_800;

struct TestContext {
    runtime: FakeRuntime,
    dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_runtime(FakeRuntime::busybox())
    }

    fn with_runtime(runtime: FakeRuntime) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        Self { runtime, dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a host file with an old modification time.
    fn old_file(&self, name: &str, data: &str) {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, data).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(OLD_MTIME, 0)).unwrap();
    }

    fn tool(&self, image: &str) -> ToolImage {
        let runtime: SharedRuntime = Arc::new(self.runtime.clone());
        ToolImage::new(runtime, image, self.path()).unwrap()
    }
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

struct Output {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn run(tool: &mut ToolImage, argv: &[&str]) -> (cincan::CommandLog, Output) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let log = tool
        .run_with(&args(argv), None, &mut stdout, &mut stderr)
        .unwrap();
    (log, Output { stdout, stderr })
}

// ============================================================================
// STREAM TESTS
// ============================================================================

#[test]
fn echo_yields_single_stdout_log() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    let (log, out) = run(&mut tool, &["echo", "abc"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(out.stdout, b"abc\n");
    assert!(out.stderr.is_empty());
    assert_eq!(log.command, args(&["busybox", "echo", "abc"]));
    assert!(log.in_files.is_empty());
    assert_eq!(log.out_files.len(), 1);
    assert_eq!(log.out_files[0].path, Path::new("/dev/stdout"));
    assert_eq!(
        log.out_files[0].digest,
        "edeaaff3f1774ad2888673770c6d64097e391bc362d7d6fb34982ddf0efd18cb"
    );
    assert!(tool.download_files().is_empty());
    assert_eq!(ctx.runtime.removed(), 1);
}

#[test]
fn run_get_string_returns_stdout_then_stderr() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |ctx: &mut ToolContext<'_>| {
        ctx.stdout(b"out\n");
        ctx.stderr(b"err\n");
        0
    });
    let ctx = TestContext::with_runtime(runtime);
    let mut tool = ctx.tool("busybox");
    assert_eq!(tool.run_get_string(&args(&["anything"])).unwrap(), "out\nerr\n");
}

#[test]
fn interactive_stdin_is_forwarded_and_logged() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    tool.options_mut().interactive = true;

    let mut input = tempfile::tempfile().unwrap();
    input.write_all(b"hello").unwrap();
    input.seek(SeekFrom::Start(0)).unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let log = tool
        .run_with(&args(&["cat"]), Some(&mut input), &mut stdout, &mut stderr)
        .unwrap();

    assert_eq!(log.exit_code, 0);
    assert_eq!(stdout, b"hello");
    let stdin_log: Vec<_> = log
        .in_files
        .iter()
        .filter(|f| f.path == Path::new("/dev/stdin"))
        .collect();
    assert_eq!(stdin_log.len(), 1);
    assert!(ctx.runtime.created()[0].open_stdin);
}

#[test]
fn start_failure_becomes_log_with_sentinel_exit() {
    let ctx = TestContext::with_runtime(FakeRuntime::busybox().fail_start("exec: \"nope\": not found"));
    let mut tool = ctx.tool("busybox");
    let (log, out) = run(&mut tool, &["echo", "x"]);

    assert_eq!(log.exit_code, 125);
    let stderr = String::from_utf8(log.stderr.clone().unwrap()).unwrap();
    assert!(stderr.contains("not found"));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
    assert!(log.out_files.is_empty());
    assert_eq!(ctx.runtime.removed(), 1);
}

#[test]
fn failed_tool_skips_download() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    let (log, out) = run(&mut tool, &["cp", "missing.txt", "copy.txt"]);

    assert_eq!(log.exit_code, 1);
    assert!(String::from_utf8_lossy(&out.stderr).contains("cannot stat"));
    assert!(log.out_files.is_empty());
    assert!(tool.download_files().is_empty());
}

// ============================================================================
// FILE TRANSFER TESTS
// ============================================================================

#[test]
fn unmodified_upload_is_not_downloaded() {
    let ctx = TestContext::new();
    ctx.old_file("README.md", "# readme\n");
    let mut tool = ctx.tool("busybox");
    let (log, out) = run(&mut tool, &["cat", "README.md"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(out.stdout, b"# readme\n");
    assert_eq!(tool.upload_files(), ["README.md"]);
    assert!(tool.download_files().is_empty());

    let readme = ctx.path().join("README.md");
    assert!(log.in_files.iter().any(|f| f.path == readme));
}

fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

#[test]
fn rerun_over_unchanged_files_downloads_nothing() {
    let ctx = TestContext::new();
    ctx.old_file("README.md", "text\n");
    let mut tool = ctx.tool("busybox");
    tool.options_mut().output_dirs = vec!["out".into()];
    let (log, _) = run(&mut tool, &["cp", "README.md", "out/copy.md"]);
    assert_eq!(log.exit_code, 0);
    assert_eq!(tool.download_files(), ["out/copy.md"]);

    // age the downloaded copy past the upload ambiguity window
    let copy = ctx.path().join("out/copy.md");
    filetime::set_file_mtime(&copy, FileTime::from_unix_time(OLD_MTIME, 0)).unwrap();
    let readme = ctx.path().join("README.md");
    let before = (mtime(&readme), mtime(&copy));

    for _ in 0..2 {
        let (log, out) = run(&mut tool, &["cat", "README.md", "out/copy.md"]);
        assert_eq!(log.exit_code, 0);
        assert_eq!(out.stdout, b"text\ntext\n");
        assert!(tool.download_files().is_empty(), "{:?}", tool.download_files());
        assert_eq!((mtime(&readme), mtime(&copy)), before);
    }
}

#[test]
fn modified_file_is_downloaded_with_new_digest() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |ctx: &mut ToolContext<'_>| {
        let mut data = ctx.read_file("data.txt").unwrap_or_default();
        data.extend_from_slice(b"more\n");
        ctx.write_file("data.txt", &data);
        0
    });
    let ctx = TestContext::with_runtime(runtime);
    ctx.old_file("data.txt", "some\n");
    let mut tool = ctx.tool("busybox");
    let (log, _) = run(&mut tool, &["append", "data.txt"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(tool.download_files(), ["data.txt"]);
    assert_eq!(
        fs::read_to_string(ctx.path().join("data.txt")).unwrap(),
        "some\nmore\n"
    );

    let host = ctx.path().join("data.txt");
    let input = log.in_files.iter().find(|f| f.path == host).unwrap();
    let output = log.out_files.iter().find(|f| f.path == host).unwrap();
    assert_ne!(input.digest, output.digest);
}

#[test]
fn new_file_in_output_dir_is_downloaded() {
    let ctx = TestContext::new();
    ctx.old_file("README.md", "text\n");
    let mut tool = ctx.tool("busybox");
    tool.options_mut().output_dirs = vec!["out".into()];
    let (log, _) = run(&mut tool, &["cp", "README.md", "out/copy.md"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(tool.upload_files(), ["README.md", "out"]);
    assert_eq!(tool.download_files(), ["out/copy.md"]);
    assert_eq!(
        fs::read_to_string(ctx.path().join("out/copy.md")).unwrap(),
        "text\n"
    );
}

#[test]
fn explicit_output_only_without_implicit_output() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |ctx: &mut ToolContext<'_>| {
        ctx.write_file("out/kept.txt", b"kept");
        ctx.write_file("stray.txt", b"stray");
        0
    });
    let ctx = TestContext::with_runtime(runtime);
    let mut tool = ctx.tool("busybox");
    tool.options_mut().output_dirs = vec!["out".into()];
    tool.options_mut().implicit_output = false;
    run(&mut tool, &["produce"]);

    assert_eq!(tool.download_files(), ["out/kept.txt"]);
    assert!(!ctx.path().join("stray.txt").exists());
}

#[test]
fn output_filter_excludes_matching_files() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |ctx: &mut ToolContext<'_>| {
        ctx.write_file("a.txt", b"a");
        ctx.write_file("ab.zip", b"zip");
        0
    });
    let ctx = TestContext::with_runtime(runtime);
    let mut tool = ctx.tool("busybox");
    tool.options_mut().output_filters = vec!["^*.txt".into()];
    run(&mut tool, &["produce"]);

    assert_eq!(tool.download_files(), ["ab.zip"]);
}

fn two_outputs(ctx: &mut ToolContext<'_>) -> i64 {
    ctx.write_file("result.txt", b"result");
    ctx.write_file("debug.log", b"noise");
    0
}

#[test]
fn ignore_file_in_image_excludes_outputs() {
    let runtime = FakeRuntime::new()
        .with_image(busybox_image("/work"), two_outputs)
        .with_file(".cincanignore", b"# build noise\n*.log\n");
    let ctx = TestContext::with_runtime(runtime);
    let mut tool = ctx.tool("busybox");
    run(&mut tool, &["produce"]);
    assert_eq!(tool.download_files(), ["result.txt"]);

    let mut tool = ctx.tool("busybox");
    tool.options_mut().no_defaults = true;
    run(&mut tool, &["produce"]);
    assert_eq!(tool.download_files(), ["debug.log", "result.txt"]);
}

#[test]
fn host_type_conflict_is_fatal_and_container_removed() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |ctx: &mut ToolContext<'_>| {
        ctx.write_file("result", b"file in container");
        0
    });
    let ctx = TestContext::with_runtime(runtime);
    fs::create_dir(ctx.path().join("result")).unwrap();
    let mut tool = ctx.tool("busybox");

    let err = tool
        .run_with(&args(&["produce"]), None, &mut Vec::new(), &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, CincanError::Conflict(_)));
    assert_eq!(ctx.runtime.removed(), 1);
}

#[test]
fn output_tar_collects_files_instead_of_host() {
    let ctx = TestContext::new();
    ctx.old_file("README.md", "copy me\n");
    let tar_path = ctx.path().join("results.tar");
    let mut tool = ctx.tool("busybox");
    tool.options_mut().output_tar = Some(tar_path.to_string_lossy().into_owned());
    let (log, _) = run(&mut tool, &["cp", "README.md", "copy.md"]);

    assert_eq!(log.exit_code, 0);
    assert!(!ctx.path().join("copy.md").exists());
    assert_eq!(tool.download_files(), ["copy.md"]);

    let mut archive = tar::Archive::new(fs::File::open(&tar_path).unwrap());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["copy.md"]);
}

#[test]
fn input_tar_is_forwarded_and_digested() {
    let ctx = TestContext::new();
    let tar_path = ctx.path().join("inputs.tar");
    {
        let mut builder = tar::Builder::new(fs::File::create(&tar_path).unwrap());
        let data = b"from tar\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(OLD_MTIME as u64);
        builder.append_data(&mut header, "in.txt", &data[..]).unwrap();
        builder.finish().unwrap();
    }
    let mut tool = ctx.tool("busybox");
    tool.options_mut().input_tar = Some(tar_path.to_string_lossy().into_owned());
    let (log, out) = run(&mut tool, &["cat", "in.txt"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(out.stdout, b"from tar\n");
    assert!(log.in_files.iter().any(|f| f.path == Path::new("in.txt")));
    assert!(tool.upload_files().is_empty());
    assert!(tool.download_files().is_empty());
}

#[test]
fn input_filters_with_input_tar_rejected() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox").with_options(RunOptions {
        input_tar: Some("in.tar".into()),
        input_filters: vec!["*.bin".into()],
        ..Default::default()
    });
    let err = tool
        .run_with(&args(&["true"]), None, &mut Vec::new(), &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, CincanError::Config(_)));
    assert!(ctx.runtime.created().is_empty());
}

#[test]
fn input_filter_prunes_uploads() {
    let ctx = TestContext::new();
    ctx.old_file("samples/a.bin", "a");
    ctx.old_file("samples/b.txt", "b");
    let mut tool = ctx.tool("busybox");
    tool.options_mut().input_filters = vec!["^*.txt".into()];
    run(&mut tool, &["cat", "samples"]);

    assert!(tool.upload_files().contains(&"samples/a.bin".to_string()));
    assert!(!tool.upload_files().contains(&"samples/b.txt".to_string()));
}

// ============================================================================
// CONTAINER OPTIONS TESTS
// ============================================================================

#[test]
fn container_options_reach_create() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox").with_options(
        RunOptions::builder()
            .network("none")
            .user("1000")
            .cap_add("NET_ADMIN")
            .cap_drop("ALL")
            .runtime("runsc")
            .entrypoint("/usr/bin/env")
            .build(),
    );
    let (log, _) = run(&mut tool, &["echo", "hi"]);
    assert_eq!(log.exit_code, 0);

    let spec = &ctx.runtime.created()[0];
    assert_eq!(spec.network_mode.as_deref(), Some("none"));
    assert_eq!(spec.user.as_deref(), Some("1000"));
    assert_eq!(spec.cap_add, vec!["NET_ADMIN"]);
    assert_eq!(spec.cap_drop, vec!["ALL"]);
    assert_eq!(spec.runtime.as_deref(), Some("runsc"));
    assert_eq!(spec.entrypoint, Some(vec!["/usr/bin/env".to_string()]));
    assert_eq!(spec.cmd, args(&["echo", "hi"]));
}

#[test]
fn empty_args_use_image_cmd() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    let (log, out) = run(&mut tool, &[]);
    assert_eq!(out.stdout, b"busybox\n");
    assert_eq!(log.command, args(&["busybox", "echo", "busybox"]));
}

#[test]
fn unknown_image_is_not_found() {
    let runtime: SharedRuntime = Arc::new(FakeRuntime::busybox());
    let err = ToolImage::new(runtime, "nope:latest", "/tmp").err().unwrap();
    assert!(matches!(err, CincanError::NotFound(_)));
}

#[test]
fn image_at_root_work_dir() {
    let image = ImageHandle {
        working_dir: String::new(),
        ..busybox_image("/")
    };
    let ctx = TestContext::with_runtime(FakeRuntime::new().with_image(image, cincan_test_utils::busybox));
    ctx.old_file("in.txt", "x\n");
    let mut tool = ctx.tool("busybox");
    let (log, _) = run(&mut tool, &["cp", "in.txt", "out.txt"]);

    assert_eq!(log.exit_code, 0);
    assert_eq!(tool.download_files(), ["out.txt"]);
}

// ============================================================================
// CONTAINER CHECK TESTS
// ============================================================================

#[test]
fn container_check_passes_and_cleans_up() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    let log = ContainerCheck::new(&mut tool).run(&[]).unwrap();

    let stdout = String::from_utf8(log.stdout.unwrap()).unwrap();
    assert!(stdout.ends_with("Test pass\n"), "{}", stdout);
    assert!(!ctx.path().join("cincan-in").exists());
    assert!(!ctx.path().join("cincan-out").exists());
    assert_eq!(
        ctx.runtime.created()[0].entrypoint,
        Some(vec!["/usr/bin/env".to_string()])
    );
}

#[test]
fn container_check_leaves_tool_options_untouched() {
    let ctx = TestContext::new();
    let mut tool = ctx.tool("busybox");
    tool.options_mut().entrypoint = Some("/bin/sh".into());
    ContainerCheck::new(&mut tool).run(&[]).unwrap();

    assert_eq!(tool.options().entrypoint.as_deref(), Some("/bin/sh"));
    assert!(!tool.options().buffer_output);

    // a regular run afterwards streams again and keeps the tool entrypoint
    let (log, _) = run(&mut tool, &["echo", "after"]);
    assert!(log.stdout.is_none());
    assert_eq!(
        ctx.runtime.created()[1].entrypoint,
        Some(vec!["/bin/sh".to_string()])
    );
}

#[test]
fn container_check_reports_missing_copy() {
    let runtime = FakeRuntime::new().with_image(busybox_image("/work"), |_: &mut ToolContext<'_>| 0);
    let ctx = TestContext::with_runtime(runtime);
    let mut tool = ctx.tool("busybox");
    let log = ContainerCheck::new(&mut tool).run(&[]).unwrap();

    let stdout = String::from_utf8(log.stdout.unwrap()).unwrap();
    assert_eq!(stdout, "Test failed, test file not copied\n");
    assert!(!ctx.path().join("cincan-in").exists());
}
