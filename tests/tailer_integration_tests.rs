// SPDX-License-Identifier: Apache-2.0

//! End-to-end tailer tests against real directories.
//!
//! Every rotation scenario runs twice, once with native notifications and
//! once with the polling backend.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fstail::bounded_channel::BoundedReceiver;
use fstail::tailer::{
    self, ErrorKind, FileTailer, FsTailer, Glob, Line, PathSpec, TailerConfig, start_tailer,
};
use fstail::telemetry::NoopBufferLoad;
use tempfile::TempDir;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait for lines that must not arrive.
const QUIET_PERIOD: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn glob(dir: &Path, pattern: &str) -> Glob {
    Glob::parse(dir.join(pattern).to_str().unwrap()).unwrap()
}

fn append(path: &Path, content: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.sync_all().unwrap();
}

fn start(dir: &Path, poll_interval: Option<Duration>) -> FsTailer {
    start_tailer(&[glob(dir, "*.log")], false, false, poll_interval).unwrap()
}

/// Waits for a line with `content`, returning every line seen up to it.
fn wait_for(lines: &BoundedReceiver<Line>, content: &str) -> Vec<Line> {
    let deadline = Instant::now() + TEST_TIMEOUT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        if let Some(line) = lines.recv_timeout(Duration::from_millis(100)) {
            let found = line.content() == content;
            seen.push(line);
            if found {
                return seen;
            }
        }
    }
    panic!("timed out waiting for line {:?}, saw {:?}", content, seen);
}

/// Lines arriving within the quiet period.
fn drain(lines: &BoundedReceiver<Line>) -> Vec<Line> {
    let mut seen = Vec::new();
    while let Some(line) = lines.recv_timeout(QUIET_PERIOD) {
        seen.push(line);
    }
    seen
}

fn count(lines: &[Line], content: &str) -> usize {
    lines.iter().filter(|l| l.content() == content).count()
}

/// Gives a freshly started tailer time to take its initial listing.
fn settle() {
    std::thread::sleep(Duration::from_millis(200));
}

fn end_to_end(poll_interval: Option<Duration>) {
    let dir = TempDir::new().unwrap();
    let mut tailer = start(dir.path(), poll_interval);
    let lines = tailer.lines();
    settle();

    let path = dir.path().join("a.log");
    append(&path, "x\n");
    let seen = wait_for(&lines, "x");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source_file(), path.as_path());

    fs::rename(&path, dir.path().join("a.log.1")).unwrap();
    append(&path, "y\n");

    let mut seen = wait_for(&lines, "y");
    seen.extend(drain(&lines));
    assert_eq!(count(&seen, "y"), 1);
    assert!(count(&seen, "x") <= 1);
    let y = seen.iter().find(|l| l.content() == "y").unwrap();
    assert_eq!(y.source_file(), path.as_path());

    tailer.close();
}

fn rename_in_place(poll_interval: Option<Duration>) {
    let dir = TempDir::new().unwrap();
    let mut tailer = start(dir.path(), poll_interval);
    let lines = tailer.lines();
    settle();

    let old = dir.path().join("a.log");
    append(&old, "one\n");
    wait_for(&lines, "one");

    let new = dir.path().join("b.log");
    fs::rename(&old, &new).unwrap();
    // Let the rename be seen before writing under the new name
    settle();
    append(&new, "two\n");

    let mut seen = wait_for(&lines, "two");
    seen.extend(drain(&lines));
    assert_eq!(count(&seen, "one"), 0);
    assert_eq!(count(&seen, "two"), 1);
    let two = seen.iter().find(|l| l.content() == "two").unwrap();
    assert_eq!(two.source_file(), new.as_path());

    tailer.close();
}

fn copy_truncate(poll_interval: Option<Duration>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "");
    let mut tailer = start(dir.path(), poll_interval);
    let lines = tailer.lines();
    settle();

    append(&path, "before rotation\n");
    wait_for(&lines, "before rotation");

    fs::copy(&path, dir.path().join("a.log.1")).unwrap();
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    settle();
    append(&path, "y\n");

    let mut seen = wait_for(&lines, "y");
    seen.extend(drain(&lines));
    assert_eq!(count(&seen, "y"), 1);
    assert!(count(&seen, "before rotation") <= 1);

    tailer.close();
}

fn delete_create(poll_interval: Option<Duration>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "");
    let mut tailer = start(dir.path(), poll_interval);
    let lines = tailer.lines();
    settle();

    append(&path, "before rotation\n");
    wait_for(&lines, "before rotation");

    fs::remove_file(&path).unwrap();
    settle();
    append(&path, "y\n");

    let mut seen = wait_for(&lines, "y");
    seen.extend(drain(&lines));
    assert_eq!(count(&seen, "y"), 1);
    assert!(count(&seen, "before rotation") <= 1);

    tailer.close();
}

#[test]
fn test_end_to_end_native() {
    end_to_end(None);
}

#[test]
fn test_end_to_end_polling() {
    end_to_end(Some(POLL_INTERVAL));
}

#[test]
fn test_rename_in_place_native() {
    rename_in_place(None);
}

#[test]
fn test_rename_in_place_polling() {
    rename_in_place(Some(POLL_INTERVAL));
}

#[test]
fn test_copy_truncate_native() {
    copy_truncate(None);
}

#[test]
fn test_copy_truncate_polling() {
    copy_truncate(Some(POLL_INTERVAL));
}

#[test]
fn test_delete_create_native() {
    delete_create(None);
}

#[test]
fn test_delete_create_polling() {
    delete_create(Some(POLL_INTERVAL));
}

#[test]
fn test_multiple_globs() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let globs = vec![glob(dir_a.path(), "*.log"), glob(dir_b.path(), "app-[0-9].txt")];
    let mut tailer = start_tailer(&globs, false, false, None).unwrap();
    let lines = tailer.lines();
    settle();

    append(&dir_b.path().join("app-x.txt"), "ignored\n");
    append(&dir_b.path().join("app-1.txt"), "from b\n");
    append(&dir_a.path().join("server.log"), "from a\n");

    let mut seen = Vec::new();
    let deadline = Instant::now() + TEST_TIMEOUT;
    while seen.len() < 2 && Instant::now() < deadline {
        seen.extend(lines.recv_timeout(Duration::from_millis(100)));
    }
    seen.extend(drain(&lines));

    let mut sources: Vec<PathBuf> = seen.iter().map(|l| l.source_file().to_path_buf()).collect();
    sources.sort();
    let mut expected = vec![dir_a.path().join("server.log"), dir_b.path().join("app-1.txt")];
    expected.sort();
    assert_eq!(sources, expected);
    assert_eq!(count(&seen, "ignored"), 0);

    tailer.close();
}

#[test]
fn test_missing_directory() {
    let dir = TempDir::new().unwrap();
    let err = start_tailer(&[glob(&dir.path().join("nope"), "*.log")], false, false, None)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DirectoryNotFound);
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let tailer = start_tailer(&[glob(dir.path(), "app.log")], false, true, None).unwrap();

    let err = tailer.errors().recv_timeout(TEST_TIMEOUT).unwrap();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(err.to_string().contains("app.log"));
    assert!(tailer.lines().recv_timeout(TEST_TIMEOUT).is_none());
}

#[test]
fn test_directory_removed_while_watched() {
    let parent = TempDir::new().unwrap();
    let dir = parent.path().join("logs");
    fs::create_dir(&dir).unwrap();

    let tailer = start_tailer(&[glob(&dir, "*.log")], false, false, Some(POLL_INTERVAL)).unwrap();
    settle();
    fs::remove_dir(&dir).unwrap();

    let err = tailer.errors().recv_timeout(TEST_TIMEOUT).unwrap();
    assert_eq!(err.kind(), ErrorKind::Unspecified);
    assert!(tailer.lines().recv_timeout(TEST_TIMEOUT).is_none());
}

#[test]
fn test_buffered_close_is_prompt() {
    let dir = TempDir::new().unwrap();
    let config = TailerConfig::new(PathSpec::single(
        dir.path().join("*.log").to_str().unwrap(),
    ))
    .with_fail_on_missing_logfile(false);
    let mut tailer = tailer::start(&config, Arc::new(NoopBufferLoad {})).unwrap();
    settle();

    let start = Instant::now();
    tailer.close();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(tailer.errors().recv_timeout(TEST_TIMEOUT).is_none());
    assert!(tailer.lines().recv_timeout(TEST_TIMEOUT).is_none());
}

#[test]
fn test_buffered_overflow_drops_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.log");
    let content: String = (0..1000).map(|i| format!("line {}\n", i)).collect();
    append(&path, &content);

    let config = TailerConfig::new(PathSpec::single(
        dir.path().join("*.log").to_str().unwrap(),
    ))
    .with_readall(true)
    .with_max_lines_in_buffer(10);
    let mut tailer = tailer::start(&config, Arc::new(NoopBufferLoad {})).unwrap();

    // Nobody reads while the tailer produces
    std::thread::sleep(Duration::from_millis(500));
    let received = drain(&tailer.lines());
    assert!(!received.is_empty());
    assert!(received.len() < 1000);

    tailer.close();
}
