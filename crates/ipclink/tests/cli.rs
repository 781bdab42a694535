#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ipclcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        assert!(start.elapsed() < timeout, "listener never created {path:?}");
        thread::sleep(Duration::from_millis(25));
    }
}

fn ipclink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ipclink"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("ipclink should run")
}

#[test]
fn send_reaches_listen_in_chunks() {
    let dir = unique_temp_dir("roundtrip");
    let sock = dir.join("link.sock");
    let sock_arg = sock.to_str().expect("utf-8 path");

    let listen = Command::new(env!("CARGO_BIN_EXE_ipclink"))
        .args(["--log-level", "error", "--format", "json", "listen", sock_arg])
        .args(["--channel", "A,B", "--count", "2", "--max-frame-size", "4"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");
    wait_for_socket(&sock, Duration::from_secs(5));

    let send = ipclink(&[
        "--format",
        "json",
        "send",
        sock_arg,
        "--channel",
        "A",
        "--data",
        "abcdefgh",
        "--repeat",
        "2",
        "--max-frame-size",
        "4",
    ]);
    assert_eq!(send.status.code(), Some(0), "send failed: {send:?}");
    let summary: serde_json::Value =
        serde_json::from_slice(&send.stdout).expect("summary should be json");
    assert_eq!(summary["channel"], "A");
    assert_eq!(summary["messages"], 2);
    assert_eq!(summary["last_sequence"], 1);
    assert_eq!(summary["stats"]["frames_sent"], 4);

    let listened = listen.wait_with_output().expect("listen should exit");
    assert_eq!(listened.status.code(), Some(0));
    let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&listened.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("message line should be json"))
        .collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["channel"], "A");
        assert_eq!(line["payload"], "abcdefgh");
        assert_eq!(line["size"], 8);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_exits_when_peer_is_done() {
    let dir = unique_temp_dir("peer-done");
    let sock = dir.join("link.sock");
    let sock_arg = sock.to_str().expect("utf-8 path");

    let listen = Command::new(env!("CARGO_BIN_EXE_ipclink"))
        .args(["--log-level", "error", "--format", "pretty", "listen", sock_arg])
        .args(["--channel", "A"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");
    wait_for_socket(&sock, Duration::from_secs(5));

    let send = ipclink(&["send", sock_arg, "--channel", "A", "--data", "bye"]);
    assert_eq!(send.status.code(), Some(0), "send failed: {send:?}");

    let listened = listen.wait_with_output().expect("listen should exit");
    assert_eq!(listened.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&listened.stdout);
    assert!(stdout.contains("channel=A size=3 payload=bye"), "{stdout}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_without_listener_fails() {
    let dir = unique_temp_dir("no-listener");
    let sock = dir.join("missing.sock");

    let output = ipclink(&[
        "send",
        sock.to_str().expect("utf-8 path"),
        "--channel",
        "A",
        "--data",
        "x",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_timeout_is_usage_error() {
    let output = ipclink(&[
        "send",
        "/tmp/unused.sock",
        "--channel",
        "A",
        "--timeout",
        "0s",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_package_version() {
    let output = ipclink(&["version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("ipclink {}", env!("CARGO_PKG_VERSION"))
    );

    let extended = ipclink(&["version", "--extended"]);
    let stdout = String::from_utf8_lossy(&extended.stdout);
    assert!(stdout.contains("default_max_frame_size: 400000"), "{stdout}");
}
