//! Integration tests for the Unix socket server.
//!
//! These run the whole daemon stack (intake, supervisor, store, socket
//! transport) behind a real socket and talk to it the way the CLI does.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use renamer_core::{Action, CaseMode, NextAction, TerminationReason};
use renamer_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use renamerd::delivery::{DeliveryService, RetryPolicy};
use renamerd::intake::Intake;
use renamerd::server::{new_clients_map, DaemonServer, SocketTransport};
use renamerd::store::spawn_store;
use renamerd::supervisor::{Supervisor, SupervisorSettings};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound for any single reply
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

fn plenty_of_space(_: &Path) -> Option<u64> {
    Some(u64::MAX)
}

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    downloads: PathBuf,
    outbox: PathBuf,
    cancel_token: CancellationToken,
    temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");
        let downloads = temp_dir.path().join("downloads");
        let outbox = temp_dir.path().join("outbox");

        let clients = new_clients_map();
        let transport = SocketTransport::new(outbox.clone(), Arc::clone(&clients));
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..RetryPolicy::default()
        };
        let supervisor = Supervisor::new(
            spawn_store(16),
            DeliveryService::new(Arc::new(transport), policy),
            SupervisorSettings::default(),
        );
        let intake = Intake::new(downloads.clone(), 1024 * 1024).with_space_probe(plenty_of_space);
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(
            socket_path.clone(),
            supervisor,
            intake,
            clients,
            cancel_token.clone(),
        );
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            downloads,
            outbox,
            cancel_token,
            temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Writes a source file outside the daemon's directories.
    async fn source_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply within timeout")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn handshake(&mut self, client_id: Option<&str>) -> String {
        self.send(ClientMessage::connect(client_id.map(str::to_string)))
            .await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    /// Uploads and returns the preview of the first status.
    async fn upload(&mut self, path: &Path) -> String {
        self.send(ClientMessage::upload(path, None)).await;
        match self.recv().await {
            DaemonMessage::Status { status } => status.preview,
            other => panic!("Expected Status, got {other:?}"),
        }
    }
}

async fn files_in(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    names
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_binds_key() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    assert_eq!(client.handshake(Some("alice")).await, "alice");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_auto_assigns_key() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let key = client.handshake(None).await;
    assert!(
        key.starts_with("client-"),
        "Expected auto-assigned key starting with 'client-', got: {key}"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect { client_id: None },
        })
        .await;

    match client.recv().await {
        DaemonMessage::Rejected { reason, .. } => {
            assert!(reason.contains("99.0"), "unexpected reason: {reason}");
        }
        other => panic!("Expected Rejected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_and_malformed_line() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    client.send_raw("{not json").await;
    match client.recv().await {
        DaemonMessage::Error {
            code, next_action, ..
        } => {
            assert_eq!(code.as_deref(), Some("malformed"));
            assert_eq!(next_action, Some(NextAction::FixInput));
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    // connection survives
    client.send(ClientMessage::ping(7)).await;
    assert_eq!(client.recv().await, DaemonMessage::pong(7));

    server.shutdown().await;
}

// ============================================================================
// Session Flow Tests
// ============================================================================

#[tokio::test]
async fn test_upload_edit_commit_delivers() {
    let server = TestServer::spawn().await;
    let source = server.source_file("report.pdf", b"quarterly").await;
    let mut client = server.connect().await;
    client.handshake(Some("alice")).await;

    assert_eq!(client.upload(&source).await, "report.pdf");

    client
        .send(ClientMessage::action(Action::SetPrefix {
            text: "Q1_".to_string(),
        }))
        .await;
    match client.recv().await {
        DaemonMessage::Status { status } => assert_eq!(status.preview, "Q1_report.pdf"),
        other => panic!("Expected Status, got {other:?}"),
    }

    client
        .send(ClientMessage::action(Action::SetCase {
            mode: CaseMode::Upper,
        }))
        .await;
    match client.recv().await {
        DaemonMessage::Status { status } => assert_eq!(status.preview, "Q1_REPORT.pdf"),
        other => panic!("Expected Status, got {other:?}"),
    }

    client.send(ClientMessage::action(Action::Commit)).await;
    let delivered_path = match client.recv().await {
        DaemonMessage::Delivered { name, path } => {
            assert_eq!(name, "Q1_REPORT.pdf");
            path
        }
        other => panic!("Expected Delivered, got {other:?}"),
    };
    assert_eq!(
        client.recv().await,
        DaemonMessage::terminated(TerminationReason::Delivered)
    );

    assert_eq!(delivered_path, server.outbox.join("alice/Q1_REPORT.pdf"));
    assert_eq!(tokio::fs::read(&delivered_path).await.unwrap(), b"quarterly");
    // the user's own file is untouched, the staged copy is gone
    assert!(source.exists());
    assert!(files_in(&server.downloads.join("alice")).await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_directive_keeps_session() {
    let server = TestServer::spawn().await;
    let source = server.source_file("notes.txt", b"n").await;
    let mut client = server.connect().await;
    client.handshake(Some("bob")).await;
    client.upload(&source).await;

    client
        .send(ClientMessage::action(Action::SetSuffix {
            text: "a/b".to_string(),
        }))
        .await;
    match client.recv().await {
        DaemonMessage::Error {
            code, next_action, ..
        } => {
            assert_eq!(code.as_deref(), Some("validation"));
            assert_eq!(next_action, Some(NextAction::FixInput));
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    client.send(ClientMessage::list_sessions()).await;
    match client.recv().await {
        DaemonMessage::SessionList { sessions } => {
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].preview, "notes.txt");
        }
        other => panic!("Expected SessionList, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_cancel_releases_artifact() {
    let server = TestServer::spawn().await;
    let source = server.source_file("photo.jpg", b"jpeg").await;
    let mut client = server.connect().await;
    client.handshake(Some("carol")).await;
    client.upload(&source).await;
    assert_eq!(files_in(&server.downloads.join("carol")).await.len(), 1);

    client.send(ClientMessage::action(Action::Cancel)).await;
    assert_eq!(
        client.recv().await,
        DaemonMessage::terminated(TerminationReason::Cancelled)
    );
    assert!(files_in(&server.downloads.join("carol")).await.is_empty());

    // the next action finds no session
    client.send(ClientMessage::action(Action::Reset)).await;
    match client.recv().await {
        DaemonMessage::Error {
            code, next_action, ..
        } => {
            assert_eq!(code.as_deref(), Some("session_expired"));
            assert_eq!(next_action, Some(NextAction::Reupload));
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_upload_missing_file_is_refused() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(Some("dave")).await;

    client
        .send(ClientMessage::upload(
            server.temp_dir.path().join("nope.pdf"),
            None,
        ))
        .await;
    match client.recv().await {
        DaemonMessage::Error {
            code, next_action, ..
        } => {
            assert_eq!(code.as_deref(), Some("unreadable"));
            assert_eq!(next_action, Some(NextAction::Reupload));
        }
        other => panic!("Expected Error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_upload_replaces_session() {
    let server = TestServer::spawn().await;
    let first = server.source_file("one.txt", b"1").await;
    let second = server.source_file("two.txt", b"2").await;
    let mut client = server.connect().await;
    client.handshake(Some("erin")).await;

    client.upload(&first).await;
    client.send(ClientMessage::upload(&second, None)).await;

    assert_eq!(
        client.recv().await,
        DaemonMessage::terminated(TerminationReason::Replaced)
    );
    match client.recv().await {
        DaemonMessage::Status { status } => assert_eq!(status.preview, "two.txt"),
        other => panic!("Expected Status, got {other:?}"),
    }

    let staged = files_in(&server.downloads.join("erin")).await;
    assert_eq!(staged.len(), 1);
    assert!(staged[0].starts_with("two_"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_removes_socket_and_artifacts() {
    let server = TestServer::spawn().await;
    let source = server.source_file("a.txt", b"a").await;
    let mut client = server.connect().await;
    client.handshake(Some("frank")).await;
    client.upload(&source).await;

    let socket_path = server.socket_path.clone();
    let downloads = server.downloads.join("frank");
    server.cancel_token.cancel();

    assert_eq!(
        client.recv().await,
        DaemonMessage::terminated(TerminationReason::Shutdown)
    );
    sleep(SHUTDOWN_GRACE_PERIOD).await;

    assert!(!socket_path.exists());
    assert!(files_in(&downloads).await.is_empty());
}
