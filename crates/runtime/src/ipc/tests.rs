use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use super::*;
use crate::error::Error;

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
	dir.path().join("ctl").join("bridgeline.sock")
}

/// Starts a server whose handler answers every request through `respond`.
fn start_server<F>(path: &PathBuf, respond: F) -> IpcServerHandle
where
	F: Fn(&IpcServerHandle, IpcInbound) + Send + 'static,
{
	let (server, inbound) = IpcServer::bind(path).unwrap();
	let handle = server.handle();
	tokio::spawn(server.run());
	spawn_handler(handle.clone(), inbound, respond);
	handle
}

fn spawn_handler<F>(handle: IpcServerHandle, mut inbound: mpsc::UnboundedReceiver<IpcInbound>, respond: F)
where
	F: Fn(&IpcServerHandle, IpcInbound) + Send + 'static,
{
	tokio::spawn(async move {
		while let Some(msg) = inbound.recv().await {
			respond(&handle, msg);
		}
	});
}

async fn wait_for_connections(handle: &IpcServerHandle, count: usize) {
	tokio::time::timeout(Duration::from_secs(5), async {
		while handle.connection_count() != count {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("connection count never reached");
}

#[tokio::test]
async fn test_request_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	start_server(&path, |handle, msg| {
		let echoed = json!({ "kind": msg.request.kind, "data": msg.request.data, "source": msg.request.source });
		handle
			.send_response_to_client(msg.connection, msg.request.id, echoed, None, true)
			.unwrap();
	});

	let client = IpcClient::connect(&path, IpcClientOptions::default()).await.unwrap();
	let value = client.send_message("web", "get_logs", json!({"level": "error"})).await.unwrap();

	assert_eq!(value["kind"], "get_logs");
	assert_eq!(value["data"], json!({"level": "error"}));
	assert_eq!(value["source"], "mcp");
	assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_responses_only_reach_the_requesting_connection() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	let handle = start_server(&path, |handle, msg| {
		handle
			.send_response_to_client(msg.connection, msg.request.id, json!({ "connection": msg.connection }), None, true)
			.unwrap();
	});

	let a = IpcClient::connect(&path, IpcClientOptions::default()).await.unwrap();
	let b = IpcClient::connect(&path, IpcClientOptions::default()).await.unwrap();
	wait_for_connections(&handle, 2).await;

	// Both clients start their counters at 1, so the ids collide on purpose.
	let (ra, rb) = tokio::join!(a.send_message("web", "ping", Value::Null), b.send_message("web", "ping", Value::Null));
	let ca = ra.unwrap()["connection"].as_u64().unwrap();
	let cb = rb.unwrap()["connection"].as_u64().unwrap();
	assert_ne!(ca, cb);

	let ids: Vec<u64> = handle.connections().iter().map(|c| c.id).collect();
	assert!(ids.contains(&ca) && ids.contains(&cb));
}

#[tokio::test]
async fn test_failure_response_surfaces_remote_error() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	start_server(&path, |handle, msg| {
		handle
			.send_response_to_client(msg.connection, msg.request.id, Value::Null, Some("unknown target".into()), false)
			.unwrap();
	});

	let client = IpcClient::connect(&path, IpcClientOptions::default()).await.unwrap();
	let err = client.send_message("nowhere", "get_logs", Value::Null).await.unwrap_err();
	match err {
		Error::Remote(message) => assert_eq!(message, "unknown target"),
		other => panic!("expected remote error, got {other:?}"),
	}
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	start_server(&path, |_, _| {});

	let client = IpcClient::connect(
		&path,
		IpcClientOptions {
			request_timeout: Duration::from_millis(100),
			..Default::default()
		},
	)
	.await
	.unwrap();

	let err = client.send_message("web", "get_logs", Value::Null).await.unwrap_err();
	assert!(err.is_timeout(), "expected timeout, got {err:?}");
	assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_server_shutdown_fails_pending_requests() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	let handle = start_server(&path, |_, _| {});

	let client = IpcClient::connect(&path, IpcClientOptions::default()).await.unwrap();
	wait_for_connections(&handle, 1).await;

	let pending = {
		let client = client.clone();
		tokio::spawn(async move { client.send_message("web", "get_logs", Value::Null).await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;
	handle.shutdown();

	let err = tokio::time::timeout(Duration::from_secs(5), pending).await.unwrap().unwrap().unwrap_err();
	assert!(err.is_disconnected(), "expected disconnected, got {err:?}");

	tokio::time::timeout(Duration::from_secs(5), async {
		while client.is_connected() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();
	let err = client.send_message("web", "get_logs", Value::Null).await.unwrap_err();
	assert!(err.is_disconnected());
}

#[tokio::test]
async fn test_split_and_coalesced_frames_are_reassembled() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	let (server, mut inbound) = IpcServer::bind(&path).unwrap();
	tokio::spawn(server.run());

	let mut raw = UnixStream::connect(&path).await.unwrap();
	raw.write_all(b"{\"id\":1,\"type\":\"a\"}\nnot json\n{\"id\":2,\"type\":\"b\"}\n{\"id\":3,")
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	raw.write_all(b"\"type\":\"c\"}\n").await.unwrap();

	let mut kinds = Vec::new();
	for _ in 0..3 {
		let msg = tokio::time::timeout(Duration::from_secs(5), inbound.recv()).await.unwrap().unwrap();
		kinds.push((msg.request.id, msg.request.kind));
	}
	assert_eq!(kinds, vec![(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())]);
}

#[tokio::test]
async fn test_response_written_as_single_line() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	start_server(&path, |handle, msg| {
		handle
			.send_response_to_client(msg.connection, msg.request.id, json!({"ok": 1}), None, true)
			.unwrap();
	});

	let mut raw = UnixStream::connect(&path).await.unwrap();
	raw.write_all(b"{\"id\":42,\"type\":\"ping\",\"target\":\"web\"}\n").await.unwrap();

	let mut received = Vec::new();
	let mut chunk = [0u8; 512];
	while !received.contains(&b'\n') {
		let n = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut chunk)).await.unwrap().unwrap();
		assert!(n > 0, "server closed the connection");
		received.extend_from_slice(&chunk[..n]);
	}

	let line = String::from_utf8(received).unwrap();
	let value: Value = serde_json::from_str(line.trim_end()).unwrap();
	assert_eq!(value["id"], 42);
	assert_eq!(value["type"], "response");
	assert_eq!(value["success"], true);
	assert!(value["error"].is_null());
}

#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	std::fs::create_dir_all(path.parent().unwrap()).unwrap();
	drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
	assert!(path.exists());

	let (server, _inbound) = IpcServer::bind(&path).unwrap();
	assert_eq!(server.path(), path.as_path());
}

#[tokio::test]
async fn test_live_socket_is_not_stolen() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	let (_first, _inbound) = IpcServer::bind(&path).unwrap();

	assert!(IpcServer::bind(&path).is_err());
}

#[tokio::test]
async fn test_socket_file_removed_when_server_stops() {
	let dir = tempfile::tempdir().unwrap();
	let path = socket_in(&dir);
	let (server, _inbound) = IpcServer::bind(&path).unwrap();
	let handle = server.handle();
	let task = tokio::spawn(server.run());

	handle.shutdown();
	task.await.unwrap().unwrap();
	assert!(!path.exists());
}

#[test]
fn test_default_socket_path_falls_back_to_temp_dir() {
	let path = default_socket_path(None);
	assert!(path.starts_with(std::env::temp_dir()));
	assert!(path.ends_with(SOCKET_FILE_NAME));

	let path = default_socket_path(Some(PathBuf::from("/run/user/1000")));
	assert_eq!(path, PathBuf::from("/run/user/1000/bridgeline.sock"));
}
