//! Integration tests for devfeed
//!
//! These tests drive a real daemon over a Unix socket in a temp dir.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use devfeed::aggregate::{AggregationContext, Node, Page, create_context};
use devfeed::domain::{ChangeType, Event, SourceId};
use devfeed::ipc::DaemonClient;
use devfeed::server::Server;
use futures::StreamExt;
use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Daemon {
    _temp_dir: TempDir,
    socket_path: PathBuf,
    context: Arc<AggregationContext>,
    handle: JoinHandle<eyre::Result<()>>,
}

fn start_daemon(capacity: usize) -> Daemon {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = temp_dir.path().join("dv.sock");
    let server = Server::bind(create_context(capacity), &socket_path).expect("Failed to bind server");
    let context = Arc::clone(server.context());
    let handle = tokio::spawn(server.run());
    Daemon {
        _temp_dir: temp_dir,
        socket_path,
        context,
        handle,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

// =============================================================================
// Request/response
// =============================================================================

#[tokio::test]
async fn test_ping() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    let version = client.ping().await.unwrap();
    assert!(!version.is_empty());
}

#[tokio::test]
async fn test_push_query_mark_read_round_trip() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    for i in 0..5 {
        let event = Event::new(SourceId::Process, format!("line-{}", i), json!({"message": i}));
        assert_eq!(client.push(event).await.unwrap(), i);
    }
    // Same id again: replaces line-0 in the flattened view
    let cursor = client
        .push(Event::new(SourceId::Process, "line-0", json!({"message": "again"})))
        .await
        .unwrap();
    assert_eq!(cursor, 5);

    let result = client.query(Some(&SourceId::Process), Page::all()).await.unwrap();
    assert_eq!(result.count, 5);
    assert_eq!(result.unread_count, 5);
    assert_eq!(result.page_info.last_cursor.as_deref(), Some("5"));

    let marked = client.mark_read(Some(&SourceId::Process), Some("3".to_string())).await.unwrap();
    assert_eq!(marked.as_deref(), Some("3"));

    let result = client.query(Some(&SourceId::Process), Page::all()).await.unwrap();
    assert_eq!(result.unread_count, 2);

    let page = client.query(None, Page::all().after("2").first(2)).await.unwrap();
    let cursors: Vec<&str> = page.items.iter().map(|item| item.cursor.as_str()).collect();
    assert_eq!(cursors, vec!["3", "4"]);
}

#[tokio::test]
async fn test_invalid_requests_return_errors() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    let err = client.push(Event::new(SourceId::Process, "", json!(null))).await.unwrap_err();
    assert!(err.to_string().contains("Invalid event"));

    let err = client
        .mark_read(Some(&SourceId::Process), Some("not-a-cursor".to_string()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid cursor"));

    // Daemon still serves after errors
    assert!(client.ping().await.is_ok());
}

#[tokio::test]
async fn test_issues_and_sources() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    client.add_issue("ts-1", json!({"message": "missing semicolon"})).await.unwrap();
    client
        .push(Event::new(SourceId::device("emulator-5554"), "boot", json!("booted")).with_source_name("Pixel 7"))
        .await
        .unwrap();

    let issues = client.query(Some(&SourceId::Issues), Page::all()).await.unwrap();
    assert_eq!(issues.count, 1);
    assert_eq!(issues.items[0].cursor, "ts-1");

    let sources = client.sources().await.unwrap();
    let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Issues", "Process", "Pixel 7"]);

    client.clear_issue("ts-1").await.unwrap();
    let issues = client.query(Some(&SourceId::Issues), Page::all()).await.unwrap();
    assert_eq!(issues.count, 0);
}

// =============================================================================
// Live feed
// =============================================================================

#[tokio::test]
async fn test_subscribe_replays_then_follows() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    client.add_issue("lint-1", json!({"message": "unused import"})).await.unwrap();
    client.push(Event::new(SourceId::Process, "a", json!("first"))).await.unwrap();

    let mut feed = client.subscribe(None).await.unwrap();

    let mut initial = Vec::new();
    for _ in 0..2 {
        let change = timeout(Duration::from_secs(5), feed.changes.next()).await.unwrap().unwrap().unwrap();
        initial.push(change);
    }
    assert!(initial.iter().all(|c| c.change_type == ChangeType::Added));
    assert!(initial.iter().any(|c| c.cursor.as_deref() == Some("lint-1")));
    assert!(initial.iter().any(|c| c.cursor.as_deref() == Some("0")));

    client.push(Event::new(SourceId::Process, "b", json!("second"))).await.unwrap();
    let change = timeout(Duration::from_secs(5), feed.changes.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(change.cursor.as_deref(), Some("1"));
    match &change.node {
        Node::Event(event) => assert_eq!(event.id, "b"),
        other => panic!("Expected event, got {:?}", other),
    }

    client.add_issue("lint-1", json!({"message": "still unused"})).await.unwrap();
    let change = timeout(Duration::from_secs(5), feed.changes.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(change.change_type, ChangeType::Updated);
}

#[tokio::test]
async fn test_disconnect_cancels_subscriber() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    let feed = client.subscribe(Some(100)).await.unwrap();
    wait_until(|| daemon.context.subscriber_count() == 1).await;
    wait_until(|| daemon.context.buffer().pending_reads() == 1).await;

    drop(feed);

    wait_until(|| daemon.context.subscriber_count() == 0).await;
    wait_until(|| daemon.context.buffer().pending_reads() == 0).await;
    wait_until(|| daemon.context.issues().listener_count() == 0).await;

    // Nothing is kept for a subscriber whose connection is gone
    wait_until(|| daemon.context.cancelled_count() == 0).await;
    assert_eq!(daemon.context.buffer().cancelled_subscribers(), 0);
    assert_eq!(daemon.context.issues().cancelled_subscribers(), 0);
}

#[tokio::test]
async fn test_oversized_request_is_rejected() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let daemon = start_daemon(16);
    let stream = tokio::net::UnixStream::connect(&daemon.socket_path).await.unwrap();
    let (read, mut write) = stream.into_split();

    // Keep writing past the line limit without ever sending a newline
    let writer = tokio::spawn(async move {
        let chunk = vec![b'x'; 64 * 1024];
        while write.write_all(&chunk).await.is_ok() {}
    });

    let mut line = String::new();
    let mut reader = BufReader::new(read);
    timeout(Duration::from_secs(30), reader.read_line(&mut line)).await.unwrap().unwrap();
    assert!(line.contains("Message too large"));
    writer.abort();

    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());
    assert!(client.ping().await.is_ok());
}

#[tokio::test]
async fn test_shutdown_ends_feeds_and_removes_socket() {
    let daemon = start_daemon(16);
    let client = DaemonClient::with_socket_path(daemon.socket_path.clone());

    let mut feed = client.subscribe(None).await.unwrap();
    wait_until(|| daemon.context.subscriber_count() == 1).await;

    client.shutdown().await.unwrap();

    let result = timeout(Duration::from_secs(5), daemon.handle).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert!(!daemon.socket_path.exists());

    let end = timeout(Duration::from_secs(5), feed.changes.next()).await.unwrap();
    assert!(end.is_none());
}
