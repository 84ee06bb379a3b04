use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bridgeline_protocol::ipc::{SOURCE_MCP, encode_line};
use bridgeline_protocol::{IpcFrame, IpcRequest};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::DEFAULT_REQUEST_TIMEOUT;
use crate::correlator::{Correlator, SequentialIds};
use crate::error::{Error, Result};
use crate::framing::LineBuffer;

#[derive(Debug, Clone)]
pub struct IpcClientOptions {
	/// Value of the `source` field on outgoing requests.
	pub source: String,
	pub request_timeout: Duration,
}

impl Default for IpcClientOptions {
	fn default() -> Self {
		Self {
			source: SOURCE_MCP.to_string(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

/// Controller-side connection to an [`IpcServer`](super::IpcServer).
///
/// Cheap to clone; all clones share one socket. Requests get integer ids from a
/// per-connection counter, and responses are matched back by id.
#[derive(Clone)]
pub struct IpcClient {
	inner: Arc<ClientInner>,
}

struct ClientInner {
	correlator: Arc<Correlator<SequentialIds>>,
	connected: Arc<AtomicBool>,
	outbound: mpsc::UnboundedSender<String>,
	options: IpcClientOptions,
	tasks: Vec<JoinHandle<()>>,
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		for task in &self.tasks {
			task.abort();
		}
		self.correlator.drain_all("IPC client dropped");
	}
}

impl IpcClient {
	pub async fn connect(path: impl AsRef<Path>, options: IpcClientOptions) -> Result<Self> {
		let path = path.as_ref();
		let stream = UnixStream::connect(path).await.map_err(|err| Error::ConnectionFailed {
			endpoint: path.display().to_string(),
			reason: err.to_string(),
		})?;
		info!(target = "bridgeline.ipc", socket = %path.display(), "connected to IPC server");

		let (read_half, write_half) = stream.into_split();
		let correlator = Arc::new(Correlator::new(SequentialIds::default()));
		let connected = Arc::new(AtomicBool::new(true));
		let (outbound, outbound_rx) = mpsc::unbounded_channel();

		let reader = tokio::spawn(read_loop(read_half, Arc::clone(&correlator), Arc::clone(&connected)));
		let writer = tokio::spawn(write_loop(write_half, outbound_rx, Arc::clone(&correlator), Arc::clone(&connected)));

		Ok(Self {
			inner: Arc::new(ClientInner {
				correlator,
				connected,
				outbound,
				options,
				tasks: vec![reader, writer],
			}),
		})
	}

	/// Sends a request with the configured source and timeout and awaits its `data`.
	///
	/// A response with `success: false` surfaces as [`Error::Remote`].
	pub async fn send_message(&self, target: &str, kind: &str, data: Value) -> Result<Value> {
		self.send_message_as(&self.inner.options.source, target, kind, data, self.inner.options.request_timeout)
			.await
	}

	/// Like [`send_message`](Self::send_message) with an explicit source and timeout.
	pub async fn send_message_as(&self, source: &str, target: &str, kind: &str, data: Value, timeout: Duration) -> Result<Value> {
		if !self.is_connected() {
			return Err(Error::Disconnected("IPC connection is closed".to_string()));
		}

		let reply = self.inner.correlator.issue(kind, timeout);
		let request = IpcRequest::new(*reply.id(), kind, data, source, target);
		let line = encode_line(&request)?;
		self.inner
			.outbound
			.send(line)
			.map_err(|_| Error::Disconnected("IPC writer has stopped".to_string()))?;

		// The reader may have drained between the check above and the issue.
		if !self.is_connected() {
			return Err(Error::Disconnected("IPC connection is closed".to_string()));
		}

		debug!(target = "bridgeline.ipc", id = request.id, kind, target, "IPC request sent");
		reply.await
	}

	pub fn is_connected(&self) -> bool {
		self.inner.connected.load(Ordering::SeqCst)
	}

	pub fn pending_count(&self) -> usize {
		self.inner.correlator.pending_count()
	}

	/// Stops the connection and fails every in-flight request.
	pub fn close(&self) {
		self.inner.connected.store(false, Ordering::SeqCst);
		for task in &self.inner.tasks {
			task.abort();
		}
		self.inner.correlator.drain_all("IPC client closed");
	}
}

async fn read_loop(mut read_half: OwnedReadHalf, correlator: Arc<Correlator<SequentialIds>>, connected: Arc<AtomicBool>) {
	let mut buffer = LineBuffer::new();
	let mut chunk = vec![0u8; 8 * 1024];

	loop {
		let n = match read_half.read(&mut chunk).await {
			Ok(0) => break,
			Ok(n) => n,
			Err(err) => {
				warn!(target = "bridgeline.ipc", error = %err, "IPC read failed");
				break;
			}
		};

		for line in buffer.push(&chunk[..n]) {
			let line = match line {
				Ok(line) => line,
				Err(err) => {
					warn!(target = "bridgeline.ipc", error = %err, "dropping bad IPC frame");
					continue;
				}
			};
			match IpcFrame::parse(&line) {
				Ok(IpcFrame::Response(response)) => {
					let id = response.id;
					let matched = if response.success {
						correlator.resolve(&id, response.data)
					} else {
						let message = response.error.unwrap_or_else(|| "request failed".to_string());
						correlator.reject(&id, Error::Remote(message))
					};
					if !matched {
						debug!(target = "bridgeline.ipc", id, "response for unknown request");
					}
				}
				Ok(IpcFrame::Request(request)) => {
					debug!(target = "bridgeline.ipc", id = request.id, kind = %request.kind, "ignoring request frame from server");
				}
				Err(err) => {
					warn!(target = "bridgeline.ipc", error = %err, "malformed IPC frame");
				}
			}
		}
	}

	connected.store(false, Ordering::SeqCst);
	correlator.drain_all("IPC connection closed");
	info!(target = "bridgeline.ipc", "IPC connection closed");
}

async fn write_loop(
	mut write_half: OwnedWriteHalf,
	mut outbound: mpsc::UnboundedReceiver<String>,
	correlator: Arc<Correlator<SequentialIds>>,
	connected: Arc<AtomicBool>,
) {
	while let Some(line) = outbound.recv().await {
		let written = match write_half.write_all(line.as_bytes()).await {
			Ok(()) => write_half.flush().await,
			Err(err) => Err(err),
		};
		if let Err(err) = written {
			warn!(target = "bridgeline.ipc", error = %err, "IPC write failed");
			connected.store(false, Ordering::SeqCst);
			correlator.drain_all("IPC write failed");
			break;
		}
	}
	let _ = write_half.shutdown().await;
}
