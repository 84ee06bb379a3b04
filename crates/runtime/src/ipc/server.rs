use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bridgeline_protocol::ipc::encode_line;
use bridgeline_protocol::{IpcFrame, IpcRequest, IpcResponse};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::framing::LineBuffer;

/// Server-assigned id of one accepted client connection.
pub type ConnectionId = u64;

/// A request received from a client, tagged with the connection to answer on.
#[derive(Debug, Clone)]
pub struct IpcInbound {
	pub connection: ConnectionId,
	pub request: IpcRequest,
}

/// Snapshot of a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
	pub id: ConnectionId,
	pub connected_at: u64,
}

struct ConnectionEntry {
	info: ConnectionInfo,
	outbound: mpsc::UnboundedSender<String>,
}

type ConnectionTable = Arc<DashMap<ConnectionId, ConnectionEntry>>;

/// Cloneable handle used by the application to answer requests.
#[derive(Clone)]
pub struct IpcServerHandle {
	connections: ConnectionTable,
	shutdown_tx: Arc<watch::Sender<bool>>,
}

impl IpcServerHandle {
	/// Writes `{id, type:"response", data, error, success, timestamp}` to `connection` only.
	pub fn send_response_to_client(
		&self,
		connection: ConnectionId,
		id: u64,
		data: Value,
		error: Option<String>,
		success: bool,
	) -> Result<()> {
		self.respond(connection, IpcResponse::new(id, data, error, success))
	}

	/// Writes a prepared response to `connection` only.
	pub fn respond(&self, connection: ConnectionId, response: IpcResponse) -> Result<()> {
		let line = encode_line(&response)?;
		let entry = self
			.connections
			.get(&connection)
			.ok_or_else(|| Error::Disconnected(format!("IPC connection {connection} is gone")))?;
		entry
			.outbound
			.send(line)
			.map_err(|_| Error::Disconnected(format!("IPC connection {connection} is closing")))?;
		debug!(target = "bridgeline.ipc", connection, id = response.id, success = response.success, "response queued");
		Ok(())
	}

	/// Snapshot of the connected clients, ordered by id.
	pub fn connections(&self) -> Vec<ConnectionInfo> {
		let mut list: Vec<ConnectionInfo> = self.connections.iter().map(|entry| entry.info.clone()).collect();
		list.sort_by_key(|info| info.id);
		list
	}

	pub fn connection_count(&self) -> usize {
		self.connections.len()
	}

	/// Stops accepting and closes every connection.
	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
	}
}

/// Removes the socket file when the server goes away.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
	fn drop(&mut self) {
		if let Err(err) = std::fs::remove_file(&self.0) {
			if err.kind() != ErrorKind::NotFound {
				warn!(target = "bridgeline.ipc", socket = %self.0.display(), error = %err, "failed to remove socket file");
			}
		}
	}
}

/// Accept loop for the control socket.
pub struct IpcServer {
	listener: UnixListener,
	socket: SocketFile,
	handle: IpcServerHandle,
	shutdown_rx: watch::Receiver<bool>,
	inbound_tx: mpsc::UnboundedSender<IpcInbound>,
	next_id: AtomicU64,
}

impl IpcServer {
	/// Binds the control socket. Must be called from within a Tokio runtime.
	///
	/// A leftover socket file from a crashed instance is unlinked and the bind
	/// retried once; a socket with a live listener behind it is left alone.
	pub fn bind(path: impl AsRef<Path>) -> Result<(Self, mpsc::UnboundedReceiver<IpcInbound>)> {
		let path = path.as_ref().to_path_buf();
		let listener = bind_listener(&path)?;
		info!(target = "bridgeline.ipc", socket = %path.display(), "IPC server listening");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

		let server = Self {
			listener,
			socket: SocketFile(path),
			handle: IpcServerHandle {
				connections: Arc::new(DashMap::new()),
				shutdown_tx: Arc::new(shutdown_tx),
			},
			shutdown_rx,
			inbound_tx,
			next_id: AtomicU64::new(1),
		};
		Ok((server, inbound_rx))
	}

	pub fn path(&self) -> &Path {
		&self.socket.0
	}

	pub fn handle(&self) -> IpcServerHandle {
		self.handle.clone()
	}

	/// Accepts clients until [`IpcServerHandle::shutdown`] is called.
	pub async fn run(mut self) -> Result<()> {
		loop {
			tokio::select! {
				changed = self.shutdown_rx.changed() => {
					if changed.is_err() || *self.shutdown_rx.borrow() {
						info!(target = "bridgeline.ipc", "IPC server shutting down");
						break;
					}
				}
				accept = self.listener.accept() => {
					let stream = match accept {
						Ok((stream, _)) => stream,
						Err(err) => {
							warn!(target = "bridgeline.ipc", error = %err, "IPC accept failed");
							continue;
						}
					};
					let id = self.next_id.fetch_add(1, Ordering::SeqCst);
					tokio::spawn(serve_connection(
						stream,
						id,
						Arc::clone(&self.handle.connections),
						self.inbound_tx.clone(),
						self.shutdown_rx.clone(),
					));
				}
			}
		}

		self.handle.connections.clear();
		Ok(())
	}
}

fn bind_listener(path: &Path) -> Result<UnixListener> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() && !parent.exists() {
			std::fs::create_dir_all(parent)?;
		}
	}

	match UnixListener::bind(path) {
		Ok(listener) => Ok(listener),
		Err(err) if err.kind() == ErrorKind::AddrInUse => {
			if std::os::unix::net::UnixStream::connect(path).is_ok() {
				return Err(Error::Io(std::io::Error::new(
					ErrorKind::AddrInUse,
					format!("another server is listening on {}", path.display()),
				)));
			}
			warn!(target = "bridgeline.ipc", socket = %path.display(), "removing stale socket file");
			std::fs::remove_file(path)?;
			Ok(UnixListener::bind(path)?)
		}
		Err(err) => Err(err.into()),
	}
}

async fn serve_connection(
	stream: UnixStream,
	id: ConnectionId,
	connections: ConnectionTable,
	inbound_tx: mpsc::UnboundedSender<IpcInbound>,
	mut shutdown_rx: watch::Receiver<bool>,
) {
	let (mut read_half, mut write_half) = stream.into_split();
	let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

	connections.insert(
		id,
		ConnectionEntry {
			info: ConnectionInfo {
				id,
				connected_at: bridgeline_protocol::now_millis(),
			},
			outbound: outbound_tx,
		},
	);
	info!(target = "bridgeline.ipc", connection = id, "IPC client connected");

	let writer = tokio::spawn(async move {
		while let Some(line) = outbound_rx.recv().await {
			if let Err(err) = write_half.write_all(line.as_bytes()).await {
				warn!(target = "bridgeline.ipc", connection = id, error = %err, "IPC write failed");
				break;
			}
			if write_half.flush().await.is_err() {
				break;
			}
		}
	});

	let mut buffer = LineBuffer::new();
	let mut chunk = vec![0u8; 8 * 1024];

	loop {
		tokio::select! {
			read = read_half.read(&mut chunk) => match read {
				Ok(0) => break,
				Ok(n) => {
					for line in buffer.push(&chunk[..n]) {
						dispatch_line(id, line, &inbound_tx, &connections);
					}
				}
				Err(err) => {
					warn!(target = "bridgeline.ipc", connection = id, error = %err, "IPC read failed");
					break;
				}
			},
			_ = shutdown_rx.changed() => break,
		}
	}

	connections.remove(&id);
	if *shutdown_rx.borrow() {
		writer.abort();
	}
	info!(target = "bridgeline.ipc", connection = id, "IPC client disconnected");
}

fn dispatch_line(
	id: ConnectionId,
	line: Result<String>,
	inbound_tx: &mpsc::UnboundedSender<IpcInbound>,
	connections: &ConnectionTable,
) {
	let line = match line {
		Ok(line) => line,
		Err(err) => {
			warn!(target = "bridgeline.ipc", connection = id, error = %err, "dropping bad IPC frame");
			return;
		}
	};

	match IpcFrame::parse(&line) {
		Ok(IpcFrame::Request(request)) => {
			debug!(target = "bridgeline.ipc", connection = id, id = request.id, kind = %request.kind, "IPC request");
			let request_id = request.id;
			if inbound_tx.send(IpcInbound { connection: id, request }).is_err() {
				warn!(target = "bridgeline.ipc", connection = id, "no handler for IPC requests");
				if let Some(entry) = connections.get(&id) {
					if let Ok(line) = encode_line(&IpcResponse::failure(request_id, "server is not handling requests")) {
						let _ = entry.outbound.send(line);
					}
				}
			}
		}
		Ok(IpcFrame::Response(response)) => {
			debug!(target = "bridgeline.ipc", connection = id, id = response.id, "ignoring response frame from client");
		}
		Err(err) => {
			warn!(target = "bridgeline.ipc", connection = id, error = %err, "malformed IPC frame");
		}
	}
}
