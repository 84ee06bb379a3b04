use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bridgeline_protocol::Envelope;
use bridgeline_protocol::envelope::{PING, PONG};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::backoff::Backoff;
use super::incoming::Incoming;
use super::{ALL_TOPICS, ChannelEvent, ChannelState, ConnectionStatus, DuplexOptions};
use crate::correlator::{Correlator, TokenIds};
use crate::error::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 64;

/// Client end of the duplex channel. Cheap to clone; clones share one connection.
///
/// Dropping the last clone stops the supervisor as if [`close`](Self::close) had been called.
#[derive(Clone)]
pub struct DuplexChannel {
	shared: Arc<Shared>,
	_lifetime: Arc<Lifetime>,
}

struct Shared {
	options: DuplexOptions,
	correlator: Correlator<TokenIds>,
	status: watch::Sender<ConnectionStatus>,
	shutdown: watch::Sender<bool>,
	events: broadcast::Sender<ChannelEvent>,
	/// Writer queue of the open session; `None` whenever the channel is not open.
	outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
	subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
	supervisor: Mutex<Option<JoinHandle<()>>>,
	/// Correlation id of the liveness ping awaiting its pong.
	ping_in_flight: Mutex<Option<String>>,
}

struct Lifetime(Arc<Shared>);

impl Drop for Lifetime {
	fn drop(&mut self) {
		self.0.shutdown.send_replace(true);
	}
}

enum SessionEnd {
	Lost(String),
	Shutdown,
}

impl DuplexChannel {
	pub fn new(options: DuplexOptions) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let shared = Arc::new(Shared {
			options,
			correlator: Correlator::new(TokenIds::default()),
			status: watch::Sender::new(ConnectionStatus::default()),
			shutdown: watch::Sender::new(false),
			events,
			outbound: Mutex::new(None),
			subscribers: Mutex::new(HashMap::new()),
			supervisor: Mutex::new(None),
			ping_in_flight: Mutex::new(None),
		});
		Self {
			_lifetime: Arc::new(Lifetime(Arc::clone(&shared))),
			shared,
		}
	}

	pub fn options(&self) -> &DuplexOptions {
		&self.shared.options
	}

	/// Starts connecting in the background. No-op while connected or mid-connect.
	///
	/// Must be called from within a Tokio runtime.
	pub fn connect(&self) {
		let mut supervisor = self.shared.supervisor.lock();
		if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
			debug!(target = "bridgeline.duplex", "connect ignored, supervisor already running");
			return;
		}

		self.shared.shutdown.send_replace(false);
		self.shared.status.send_modify(|status| {
			status.state = ChannelState::Connecting;
			status.reconnect_attempts = 0;
			status.exhausted = false;
		});
		let shutdown = self.shared.shutdown.subscribe();
		*supervisor = Some(tokio::spawn(supervise(Arc::clone(&self.shared), shutdown)));
	}

	/// Closes the channel for good and waits for the supervisor to stop.
	///
	/// Pending requests fail with [`Error::Disconnected`]. [`connect`](Self::connect)
	/// may be called again afterwards.
	pub async fn close(&self) {
		self.shared.shutdown.send_replace(true);
		let task = self.shared.supervisor.lock().take();
		if let Some(task) = task {
			let _ = task.await;
		}
		self.shared.take_outbound();
		self.shared.correlator.drain_all("channel closed");
		self.shared.status.send_modify(|status| status.state = ChannelState::Closed);
	}

	/// Queues an envelope on the open session.
	///
	/// Fails fast with [`Error::Disconnected`] unless the channel is open; nothing
	/// is buffered for a later session.
	pub fn send(&self, envelope: &Envelope) -> Result<()> {
		self.shared.send(envelope)
	}

	/// Sends `kind` with a fresh `requestId` and waits for the reply's `data`.
	///
	/// A reply carrying `error` becomes [`Error::Remote`].
	pub async fn send_request(&self, kind: &str, data: Value, timeout: Duration) -> Result<Value> {
		self.shared.request(kind, data, timeout).await
	}

	/// [`send_request`](Self::send_request) with the configured default timeout.
	pub async fn request(&self, kind: &str, data: Value) -> Result<Value> {
		self.send_request(kind, data, self.shared.options.request_timeout).await
	}

	/// Receives every published envelope of type `topic`, in arrival order.
	///
	/// Use [`ALL_TOPICS`] to receive everything. Envelopes published before the
	/// call are not replayed.
	pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Envelope> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.shared.subscribers.lock().entry(topic.to_string()).or_default().push(tx);
		rx
	}

	pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
		self.shared.events.subscribe()
	}

	pub fn status(&self) -> ConnectionStatus {
		self.shared.status.borrow().clone()
	}

	pub fn state(&self) -> ChannelState {
		self.shared.status.borrow().state
	}

	pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
		self.shared.status.subscribe()
	}

	pub fn is_open(&self) -> bool {
		self.state() == ChannelState::Open
	}

	pub fn pending_count(&self) -> usize {
		self.shared.correlator.pending_count()
	}

	/// Waits until the channel is open.
	///
	/// Fails when the channel closes instead, with [`Error::ReconnectExhausted`]
	/// if reconnecting gave up.
	pub async fn wait_open(&self) -> Result<()> {
		let mut rx = self.watch_status();
		let status = rx
			.wait_for(|status| matches!(status.state, ChannelState::Open | ChannelState::Closed))
			.await
			.map_err(|_| Error::Disconnected("channel dropped".to_string()))?
			.clone();
		match status.state {
			ChannelState::Open => Ok(()),
			_ if status.exhausted => Err(Error::ReconnectExhausted {
				attempts: status.reconnect_attempts,
			}),
			_ => Err(Error::Disconnected(
				status.last_error.unwrap_or_else(|| "channel is closed".to_string()),
			)),
		}
	}
}

impl Shared {
	fn emit(&self, event: ChannelEvent) {
		let _ = self.events.send(event);
	}

	fn send(&self, envelope: &Envelope) -> Result<()> {
		let text = envelope.to_json()?;
		let outbound = self.outbound.lock();
		let Some(tx) = outbound.as_ref() else {
			return Err(Error::Disconnected("channel is not open".to_string()));
		};
		tx.send(Message::Text(text))
			.map_err(|_| Error::Disconnected("channel is not open".to_string()))?;
		trace!(target = "bridgeline.duplex", kind = %envelope.kind, request_id = ?envelope.request_id, "queued");
		Ok(())
	}

	async fn request(&self, kind: &str, data: Value, timeout: Duration) -> Result<Value> {
		let reply = self.correlator.issue(kind, timeout);
		self.send(&Envelope::request(kind, reply.id().clone(), data))?;
		reply.await
	}

	/// Sends one liveness ping and waits for its pong.
	async fn ping(&self) -> Result<()> {
		let reply = self.correlator.issue(PING, self.options.ping_timeout);
		let id = reply.id().clone();
		*self.ping_in_flight.lock() = Some(id.clone());
		let result = match self.send(&Envelope::request(PING, id, Value::Null)) {
			Ok(()) => reply.await.map(drop),
			Err(err) => Err(err),
		};
		self.ping_in_flight.lock().take();
		result
	}

	fn take_outbound(&self) -> Option<mpsc::UnboundedSender<Message>> {
		self.outbound.lock().take()
	}

	fn publish(&self, envelope: Envelope) {
		let mut subscribers = self.subscribers.lock();
		for topic in [envelope.kind.as_str(), ALL_TOPICS] {
			if let Some(senders) = subscribers.get_mut(topic) {
				senders.retain(|tx| tx.send(envelope.clone()).is_ok());
			}
		}
		subscribers.retain(|_, senders| !senders.is_empty());
	}

	fn dispatch_text(&self, text: &str) {
		let envelope = match Envelope::from_json(text) {
			Ok(envelope) => envelope,
			Err(err) => {
				warn!(target = "bridgeline.duplex", error = %err, "dropping malformed envelope");
				return;
			}
		};

		match Incoming::classify(envelope, |id| self.correlator.contains(id)) {
			Incoming::Ping { request_id } => {
				let mut pong = Envelope::new(PONG);
				pong.request_id = request_id;
				if let Err(err) = self.send(&pong) {
					debug!(target = "bridgeline.duplex", error = %err, "could not answer ping");
				}
			}
			Incoming::Pong { request_id } => {
				// Servers may answer without the id, or with one of their own.
				let id = request_id
					.filter(|id| self.correlator.contains(id))
					.or_else(|| self.ping_in_flight.lock().clone());
				match id {
					Some(id) => {
						self.correlator.resolve(&id, Value::Null);
					}
					None => trace!(target = "bridgeline.duplex", "unsolicited pong"),
				}
			}
			Incoming::Reply { request_id, data, error } => match error {
				Some(message) => {
					self.correlator.reject(&request_id, Error::Remote(message));
				}
				None => {
					self.correlator.resolve(&request_id, data);
				}
			},
			Incoming::Stray { kind, request_id } => {
				debug!(target = "bridgeline.duplex", %kind, %request_id, "reply for unknown request");
			}
			Incoming::AuthError { message } => {
				warn!(target = "bridgeline.duplex", message = ?message, "server requires authentication");
				self.emit(ChannelEvent::AuthRequired { message });
			}
			Incoming::ServerError { request_id, message } => {
				warn!(target = "bridgeline.duplex", %message, request_id = ?request_id, "server error");
				self.emit(ChannelEvent::ServerError { request_id, message });
			}
			Incoming::Event(envelope) => self.publish(envelope),
		}
	}
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
	let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
	let url = shared.options.url.clone();
	let mut backoff = Backoff::new(shared.options.reconnect);

	loop {
		debug!(target = "bridgeline.duplex", %url, attempt = backoff.attempts(), "connecting");
		let connected = tokio::select! {
			result = connect_async(url.as_str()) => result,
			_ = shutdown_requested(&mut shutdown) => break,
		};

		match connected {
			Ok((socket, _)) => {
				backoff.reset();
				match run_session(&shared, socket, &mut shutdown).await {
					SessionEnd::Shutdown => {
						shared.emit(ChannelEvent::Disconnected {
							reason: "closed".to_string(),
						});
						break;
					}
					SessionEnd::Lost(reason) => {
						warn!(target = "bridgeline.duplex", %reason, "connection lost");
						shared.status.send_modify(|status| status.last_error = Some(reason.clone()));
						shared.emit(ChannelEvent::Disconnected { reason });
					}
				}
			}
			Err(err) => {
				warn!(target = "bridgeline.duplex", %url, error = %err, "connect failed");
				shared.status.send_modify(|status| status.last_error = Some(err.to_string()));
			}
		}

		let Some(delay) = backoff.next_delay() else {
			let attempts = backoff.attempts();
			warn!(target = "bridgeline.duplex", attempts, "giving up reconnecting");
			shared.status.send_modify(|status| {
				status.state = ChannelState::Closed;
				status.exhausted = true;
			});
			shared.emit(ChannelEvent::ReconnectExhausted { attempts });
			return;
		};

		let attempt = backoff.attempts();
		info!(target = "bridgeline.duplex", attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
		shared.status.send_modify(|status| {
			status.state = ChannelState::Reconnecting;
			status.reconnect_attempts = attempt;
		});
		shared.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_requested(&mut shutdown) => break,
		}
	}

	shared.status.send_modify(|status| status.state = ChannelState::Closed);
	debug!(target = "bridgeline.duplex", "supervisor stopped");
}

async fn run_session(shared: &Arc<Shared>, socket: Socket, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
	let (mut sink, mut stream) = socket.split();
	let (tx, mut rx) = mpsc::unbounded_channel();
	*shared.outbound.lock() = Some(tx);

	shared.status.send_modify(|status| {
		status.state = ChannelState::Open;
		status.reconnect_attempts = 0;
		status.last_error = None;
		status.exhausted = false;
	});
	info!(target = "bridgeline.duplex", url = %shared.options.url, "connected");
	shared.emit(ChannelEvent::Connected);

	let (liveness_tx, mut liveness_rx) = mpsc::channel::<String>(1);
	let liveness = tokio::spawn(keep_alive(Arc::clone(shared), liveness_tx));

	let end = loop {
		tokio::select! {
			outgoing = rx.recv() => {
				let Some(message) = outgoing else {
					break SessionEnd::Lost("writer queue closed".to_string());
				};
				if let Err(err) = sink.send(message).await {
					break SessionEnd::Lost(format!("write failed: {err}"));
				}
			}
			incoming = stream.next() => match incoming {
				Some(Ok(Message::Text(text))) => shared.dispatch_text(&text),
				Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
					Ok(text) => shared.dispatch_text(text),
					Err(_) => warn!(target = "bridgeline.duplex", len = bytes.len(), "dropping non-UTF-8 binary frame"),
				},
				Some(Ok(Message::Close(frame))) => {
					let reason = match frame {
						Some(frame) => format!("closed by server ({}): {}", u16::from(frame.code), frame.reason),
						None => "closed by server".to_string(),
					};
					break SessionEnd::Lost(reason);
				}
				Some(Ok(_)) => {}
				Some(Err(err)) => break SessionEnd::Lost(err.to_string()),
				None => break SessionEnd::Lost("connection closed".to_string()),
			},
			reason = liveness_rx.recv() => {
				break SessionEnd::Lost(reason.unwrap_or_else(|| "liveness check stopped".to_string()));
			}
			_ = shutdown_requested(shutdown) => {
				let _ = sink.send(Message::Close(None)).await;
				break SessionEnd::Shutdown;
			}
		}
	};

	liveness.abort();
	shared.take_outbound();
	shared.status.send_modify(|status| {
		if status.state == ChannelState::Open {
			status.state = ChannelState::Reconnecting;
		}
	});
	let reason = match &end {
		SessionEnd::Lost(reason) => reason.as_str(),
		SessionEnd::Shutdown => "channel closed",
	};
	shared.correlator.drain_all(reason);
	end
}

/// Pings through the correlator every `ping_interval`; reports the first failure and stops.
async fn keep_alive(shared: Arc<Shared>, failed: mpsc::Sender<String>) {
	let period = shared.options.ping_interval;
	let mut interval = tokio::time::interval_at(Instant::now() + period, period);
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		interval.tick().await;
		match shared.ping().await {
			Ok(()) => trace!(target = "bridgeline.duplex", "pong received"),
			Err(err) => {
				warn!(target = "bridgeline.duplex", error = %err, "liveness check failed");
				let _ = failed.send(format!("liveness check failed: {err}")).await;
				return;
			}
		}
	}
}
