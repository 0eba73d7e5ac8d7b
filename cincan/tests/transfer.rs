//! Integration tests for tar transfer against a fake container.

use cincan::archive::{DownloadOptions, OutputSink, TarTool, UploadStats};
use cincan::container::{Container, ContainerRuntime, ContainerSpec, ImageHandle};
use cincan::files::{FileMatcher, UploadEntry};
use cincan_test_utils::{FakeRuntime, busybox_image};
use std::fs;
use tempfile::TempDir;

fn create(runtime: &FakeRuntime) -> (Box<dyn Container>, ImageHandle) {
    let image = runtime.image("busybox").unwrap();
    let container = runtime
        .create(&ContainerSpec {
            image: image.id.clone(),
            ..Default::default()
        })
        .unwrap();
    (container, image)
}

fn entry(dir: &TempDir, name: &str) -> UploadEntry {
    UploadEntry {
        host: dir.path().join(name),
        arc_name: name.to_string(),
    }
}

#[test]
fn upload_creates_parents_and_records_stats() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("a/b")).unwrap();
    fs::write(dir.path().join("a/b/c.txt"), "abc").unwrap();

    let runtime = FakeRuntime::busybox();
    let (container, image) = create(&runtime);
    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let mut stats = UploadStats::new();
    let logs = tool.upload(&[entry(&dir, "a/b/c.txt")], &mut stats).unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].path, dir.path().join("a/b/c.txt"));
    assert_eq!(
        logs[0].digest,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    let names: Vec<&str> = stats.names().collect();
    assert_eq!(names, vec!["a", "a/b", "a/b/c.txt"]);
    assert_eq!(stats.get("a/b/c.txt").unwrap().size, 3);

    let fs = runtime.last_fs().unwrap();
    let fs = fs.lock();
    assert_eq!(fs.read("/work/a/b/c.txt").unwrap(), b"abc");
    assert!(fs.is_dir("/work/a/b"));
    assert_eq!(fs.node("/work/a").unwrap().mode & 0o777, 0o777);
}

#[test]
fn upload_of_missing_path_creates_empty_dir() {
    let dir = TempDir::new().unwrap();
    let runtime = FakeRuntime::busybox();
    let (container, image) = create(&runtime);
    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let mut stats = UploadStats::new();
    let logs = tool.upload(&[entry(&dir, "results")], &mut stats).unwrap();

    assert!(logs.is_empty());
    assert!(runtime.last_fs().unwrap().lock().is_dir("/work/results"));
    assert!(stats.get("results").is_some());
}

#[test]
fn missing_explicit_output_is_skipped() {
    let dir = TempDir::new().unwrap();
    let runtime = FakeRuntime::busybox();
    let (container, image) = create(&runtime);
    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let options = DownloadOptions {
        output_paths: vec!["nothere".into()],
        implicit_output: false,
        ..Default::default()
    };
    let logs = tool
        .download(&options, &UploadStats::new(), OutputSink::Host)
        .unwrap();
    assert!(logs.is_empty());
    assert!(!dir.path().join("nothere").exists());
}

#[test]
fn download_to_tar_uses_relative_names() {
    let dir = TempDir::new().unwrap();
    let runtime = FakeRuntime::busybox();
    let (container, image) = create(&runtime);
    runtime
        .last_fs()
        .unwrap()
        .lock()
        .write("/work/out/r.txt", b"r".to_vec(), 1_600_000_000);

    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let mut tar_bytes = Vec::new();
    let options = DownloadOptions {
        implicit_output: true,
        ..Default::default()
    };
    let logs = tool
        .download(&options, &UploadStats::new(), OutputSink::Tar(&mut tar_bytes))
        .unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].path, std::path::Path::new("out/r.txt"));
    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["out/r.txt"]);
    assert!(!dir.path().join("out").exists());
}

#[test]
fn caller_include_filter_overrides_ignore_file() {
    let dir = TempDir::new().unwrap();
    let runtime = FakeRuntime::new()
        .with_image(busybox_image("/work"), cincan_test_utils::busybox)
        .with_file(".cincanignore", b"*.log\n");
    let (container, image) = create(&runtime);
    {
        let fs = runtime.last_fs().unwrap();
        let mut fs = fs.lock();
        fs.write("/work/run.log", b"log".to_vec(), 1_600_000_000);
        fs.write("/work/data.bin", b"bin".to_vec(), 1_600_000_000);
    }

    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let options = DownloadOptions {
        filters: FileMatcher::parse(&["*.log"]),
        implicit_output: true,
        ..Default::default()
    };
    tool.download(&options, &UploadStats::new(), OutputSink::Host)
        .unwrap();

    assert!(dir.path().join("run.log").exists());
    assert!(!dir.path().join("data.bin").exists());
}

#[test]
fn identical_host_file_is_not_rewritten() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("same.txt");
    fs::write(&host, "same").unwrap();
    let before = fs::metadata(&host).unwrap().modified().unwrap();

    let runtime = FakeRuntime::busybox();
    let (container, image) = create(&runtime);
    runtime
        .last_fs()
        .unwrap()
        .lock()
        .write("/work/same.txt", b"same".to_vec(), 1_600_000_000);

    let tool = TarTool::new(container.as_ref(), &image, dir.path());
    let options = DownloadOptions {
        implicit_output: true,
        ..Default::default()
    };
    let logs = tool
        .download(&options, &UploadStats::new(), OutputSink::Host)
        .unwrap();

    assert_eq!(logs.len(), 1);
    assert_eq!(fs::metadata(&host).unwrap().modified().unwrap(), before);
}
