//! End-to-end tests for the sessionlink binary.
//!
//! Each test runs real processes against a temporary coordination root: one
//! `serve` process owns the fixture session, short-lived `call`/`status`
//! processes act as proxies.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sessionlink"))
}

/// Create a root directory plus a three-chat fixture next to it.
fn create_test_env() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path().join("root");
    let fixture = temp_dir.path().join("fixture.json");

    let data = json!({
        "chats": [
            {"id": "c1", "name": "Alice"},
            {"id": "c2", "name": "Bob"},
            {"id": "c3", "name": "Climbing group", "isGroup": true},
        ],
        "contacts": [{"id": "c1", "name": "Alice"}],
        "messages": [
            {"id": "m1", "chatId": "c1", "timestamp": "2024-03-01T10:00:00Z", "body": "Crag on Sunday?"},
        ],
    });
    std::fs::write(&fixture, serde_json::to_vec_pretty(&data).unwrap()).unwrap();

    (temp_dir, root, fixture)
}

struct ServeHandle {
    child: tokio::process::Child,
    role: String,
    instance_id: String,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl ServeHandle {
    async fn kill(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start `serve` and wait for its `ROLE=` announcement.
async fn start_serve(root: &Path, fixture: &Path) -> Result<ServeHandle, String> {
    let mut child = tokio::process::Command::new(binary())
        .arg("--root")
        .arg(root)
        .arg("serve")
        .arg("--fixture")
        .arg(fixture)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn sessionlink: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut announced = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(rest) = line.strip_prefix("ROLE=") {
                    let mut parts = rest.split_whitespace();
                    let role = parts.next().unwrap_or_default().to_string();
                    let instance_id = parts
                        .next()
                        .and_then(|p| p.strip_prefix("INSTANCE="))
                        .unwrap_or_default()
                        .to_string();
                    announced = Some((role, instance_id));
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read sessionlink stdout: {err}")),
            Err(_) => continue,
        }
    }

    let (role, instance_id) = announced.ok_or_else(|| "ROLE line not emitted by serve".to_string())?;
    let stdout_drain = tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(ServeHandle {
        child,
        role,
        instance_id,
        stdout_drain: Some(stdout_drain),
    })
}

struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CliOutput {
    fn json(&self) -> Value {
        serde_json::from_str(&self.stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {}", self.stdout))
    }
}

async fn run_cli(root: &Path, args: &[&str]) -> CliOutput {
    let output = tokio::process::Command::new(binary())
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .await
        .expect("failed to run sessionlink");

    CliOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn test_call_through_primary_leaves_no_files() {
    let (_tmp, root, fixture) = create_test_env();
    let server = start_serve(&root, &fixture).await.unwrap();
    assert_eq!(server.role, "primary");

    let output = run_cli(&root, &["call", "listChats", r#"{"limit": 5}"#]).await;
    assert!(output.success, "call failed: {}", output.stderr);

    let chats = output.json();
    assert_eq!(chats.as_array().unwrap().len(), 3);
    assert_eq!(chats[0]["name"], "Alice");

    assert!(dir_is_empty(&root.join("mailbox/requests")));
    assert!(dir_is_empty(&root.join("mailbox/responses")));

    server.kill().await;
}

#[tokio::test]
async fn test_remote_error_is_reported() {
    let (_tmp, root, fixture) = create_test_env();
    let server = start_serve(&root, &fixture).await.unwrap();

    let output = run_cli(&root, &["call", "getMessages", r#"{"chatId": "nope"}"#]).await;
    assert!(!output.success);
    assert!(output.stderr.contains("Chat not found: nope"), "stderr: {}", output.stderr);
    assert!(dir_is_empty(&root.join("mailbox/requests")));

    server.kill().await;
}

#[tokio::test]
async fn test_status_reports_owner_without_relay() {
    let (_tmp, root, fixture) = create_test_env();
    let server = start_serve(&root, &fixture).await.unwrap();

    let output = run_cli(&root, &["status"]).await;
    assert!(output.success, "status failed: {}", output.stderr);

    let status = output.json();
    assert_eq!(status["role"], "proxy");
    assert_eq!(status["ownerInstanceId"], server.instance_id.as_str());
    assert_eq!(status["isReady"], true);

    server.kill().await;
}

#[tokio::test]
async fn test_second_server_stands_by() {
    let (_tmp, root, fixture) = create_test_env();
    let first = start_serve(&root, &fixture).await.unwrap();
    let second = start_serve(&root, &fixture).await.unwrap();

    assert_eq!(first.role, "primary");
    assert_eq!(second.role, "proxy");

    second.kill().await;
    first.kill().await;
}

#[tokio::test]
async fn test_killed_primary_is_replaced() {
    let (_tmp, root, fixture) = create_test_env();
    let first = start_serve(&root, &fixture).await.unwrap();
    let first_id = first.instance_id.clone();
    first.kill().await;

    let lease = run_cli(&root, &["lease"]).await.json();
    assert_eq!(lease["state"], "stale");
    assert_eq!(lease["lease"]["instanceId"], first_id.as_str());

    let second = start_serve(&root, &fixture).await.unwrap();
    assert_eq!(second.role, "primary");
    assert_ne!(second.instance_id, first_id);

    second.kill().await;
}

#[tokio::test]
async fn test_call_without_primary_times_out() {
    let (_tmp, root, _fixture) = create_test_env();

    let output = run_cli(&root, &["call", "listContacts", "--timeout-ms", "200"]).await;
    assert!(!output.success);
    assert!(
        output.stderr.contains("primary instance may not be running"),
        "stderr: {}",
        output.stderr
    );
    assert!(dir_is_empty(&root.join("mailbox/requests")));
}

#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let (_tmp, root, _fixture) = create_test_env();

    let output = run_cli(&root, &["call", "teleport"]).await;
    assert!(!output.success);
    assert!(output.stderr.contains("Unknown operation: teleport"), "stderr: {}", output.stderr);
}
