//! Exit-code behaviour of the `netbench` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn netbench(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("netbench").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn help_lists_actions() {
    let dir = TempDir::new().unwrap();
    netbench(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("collect").and(predicate::str::contains("test")));
}

#[test]
fn missing_server_fails() {
    let dir = TempDir::new().unwrap();
    netbench(&dir)
        .args(["test", "--", "cat"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server address"));
}

#[test]
fn test_without_capture_asks_for_collect() {
    let dir = TempDir::new().unwrap();
    netbench(&dir)
        .args(["--server", "127.0.0.1:9", "test", "--", "cat"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run the 'collect' action first"));
    assert!(dir.path().join("testbench.log").exists());
}

#[test]
fn invalid_test_case_file_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("userInput.txt"), b"hello\n").unwrap();
    std::fs::write(dir.path().join("testCases.json"), b"[{\"SegmentSize\": 0}]").unwrap();

    netbench(&dir)
        .args(["--server", "127.0.0.1:9", "test", "--", "cat"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("segment size"));
}

#[cfg(unix)]
#[test]
fn collect_exits_while_stdin_stays_open() {
    use assert_cmd::cargo::CommandCargoExt;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let dir = TempDir::new().unwrap();
    // Nobody connects, so the run ends once the handoff wait times out.
    std::fs::write(dir.path().join("netbench.toml"), "completion_timeout_secs = 1\n").unwrap();

    let mut child = std::process::Command::cargo_bin("netbench")
        .unwrap()
        .current_dir(dir.path())
        .args([
            "--config",
            "netbench.toml",
            "--server",
            "127.0.0.1:9",
            "--listen",
            "127.0.0.1:0",
            "collect",
            "--",
            "sh",
            "-c",
            "exit 0",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _held_open = child.stdin.take();

    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if Instant::now() > deadline {
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    if status.is_none() {
        let _ = child.kill();
        let _ = child.wait();
    }

    let status = status.expect("collect kept running while stdin was open");
    assert!(status.success());
    assert!(dir.path().join("userInput.txt").exists());
}
