//! Provenance across runs: persisted logs queried with the inspector.

use cincan::provenance::{CommandInspector, CommandLogIndex, CommandLogWriter, LogStore, hash_file};
use cincan::{SharedRuntime, ToolImage};
use cincan_test_utils::FakeRuntime;
use filetime::FileTime;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn run_logged(tool: &mut ToolImage, writer: &CommandLogWriter, argv: &[&str]) {
    let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
    let log = tool
        .run_with(&argv, None, &mut Vec::new(), &mut Vec::new())
        .unwrap();
    assert_eq!(log.exit_code, 0);
    writer.write(&log).unwrap();
}

#[test]
fn fanout_follows_copies_across_runs() {
    let work = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    let readme = work.path().join("README.md");
    fs::write(&readme, "origin\n").unwrap();
    filetime::set_file_mtime(&readme, FileTime::from_unix_time(1_577_836_800, 0)).unwrap();

    let runtime: SharedRuntime = Arc::new(FakeRuntime::busybox());
    let store = LogStore::new(home.path());
    let writer = CommandLogWriter::new(store.clone());

    let mut tool = ToolImage::new(Arc::clone(&runtime), "busybox", work.path()).unwrap();
    run_logged(&mut tool, &writer, &["cp", "README.md", "copy.md"]);
    let mut tool = ToolImage::new(runtime, "busybox", work.path()).unwrap();
    run_logged(&mut tool, &writer, &["cat", "copy.md"]);

    let index = CommandLogIndex::load(&store).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.logs()[0].command[1], "cat");

    let digest = hash_file(&readme).unwrap();
    let inspector = CommandInspector::new(&index, work.path());
    let tree = inspector.fanout(&readme, &digest, 4);

    assert_eq!(tree.next.len(), 1);
    let cp = &tree.next[0];
    assert_eq!(cp.command.command_string(), "busybox cp README.md copy.md");
    let copy = cp
        .next
        .iter()
        .find(|f| f.file.ends_with("copy.md"))
        .expect("copy.md is an output of cp");
    assert!(
        copy.next
            .iter()
            .any(|c| c.command.command_string() == "busybox cat copy.md")
    );

    let rendered = inspector.render(&tree);
    assert!(rendered.starts_with("> README.md "), "{}", rendered);
    assert!(rendered.contains("\n  > busybox cp README.md copy.md\n"));
}

#[test]
fn fanin_finds_producer() {
    let work = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    fs::write(work.path().join("in.txt"), "data\n").unwrap();
    filetime::set_file_mtime(work.path().join("in.txt"), FileTime::from_unix_time(1_577_836_800, 0))
        .unwrap();

    let runtime: SharedRuntime = Arc::new(FakeRuntime::busybox());
    let store = LogStore::new(home.path());
    let writer = CommandLogWriter::new(store.clone());
    let mut tool = ToolImage::new(runtime, "busybox", work.path()).unwrap();
    run_logged(&mut tool, &writer, &["cp", "in.txt", "out.txt"]);

    let out = work.path().join("out.txt");
    let digest = hash_file(&out).unwrap();
    let index = CommandLogIndex::load(&store).unwrap();
    let tree = CommandInspector::new(&index, work.path()).fanin(&out, &digest, 2);

    assert_eq!(tree.next.len(), 1);
    assert_eq!(tree.next[0].command.command[1], "cp");
    assert!(
        tree.next[0]
            .next
            .iter()
            .any(|f| f.file == work.path().join("in.txt"))
    );
}
