//! Dev-bridge hub: the WebSocket endpoint browser sessions connect to.
//!
//! Each connection is registered with the [`ClientRegistry`], gets a writer
//! task fed by an unbounded queue, and its own correlator for commands the
//! server forwards to it. Ownership requests are resolved against the registry
//! and the resulting notices are delivered to whichever peers they address.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::Response;
use axum::routing::get;
use bridgeline_protocol::envelope::{ERROR, PONG, response_type};
use bridgeline_protocol::{ControlRequest, Envelope, Inbound, ServerNotice};
use bridgeline_runtime::{Correlator, TokenIds};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace, warn};

use crate::error::{ArbiterError, HubError};
use crate::registry::{ClientRegistry, Directed, PeerId, PeerMetadata, PeerSnapshot};

/// Request type browsers (and IPC clients) use to list connected sessions.
pub const GET_CLIENTS: &str = "get_clients";
/// Envelope sent to every peer right after it connects, carrying its id.
pub const WELCOME: &str = "connected";

struct PeerLink {
	outbound: mpsc::UnboundedSender<Message>,
	correlator: Arc<Correlator<TokenIds>>,
}

#[derive(Default)]
struct HubState {
	registry: Mutex<ClientRegistry>,
	links: Mutex<HashMap<PeerId, PeerLink>>,
}

#[derive(Clone, Default)]
pub struct BridgeHub {
	state: Arc<HubState>,
}

impl BridgeHub {
	pub fn new() -> Self {
		Self::default()
	}

	/// `GET /` health check and `GET /ws` upgrade.
	///
	/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
	/// [`serve`](Self::serve) does this.
	pub fn router(&self) -> Router {
		Router::new()
			.route("/", get(|| async { "OK" }))
			.route("/ws", get(upgrade))
			.with_state(self.clone())
	}

	pub async fn bind(addr: &str) -> Result<TcpListener, HubError> {
		TcpListener::bind(addr).await.map_err(|source| HubError::Bind {
			addr: addr.to_string(),
			source,
		})
	}

	/// Serves the hub on `listener` until `shutdown` completes.
	pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), HubError>
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let addr = listener.local_addr()?;
		info!(target = "bridgeline.hub", %addr, "dev-bridge hub listening");
		axum::serve(listener, self.router().into_make_service_with_connect_info::<SocketAddr>())
			.with_graceful_shutdown(shutdown)
			.await?;
		Ok(())
	}

	/// Snapshot of the connected sessions.
	pub fn clients(&self) -> Vec<PeerSnapshot> {
		self.state.registry.lock().clients()
	}

	pub fn active_peer(&self) -> Option<PeerSnapshot> {
		self.state.registry.lock().active()
	}

	pub fn master_peer(&self) -> Option<PeerSnapshot> {
		self.state.registry.lock().master()
	}

	/// Sends `kind` to the active session and waits for its `<kind>_response` data.
	pub async fn forward_to_active(&self, kind: &str, data: Value, timeout: Duration) -> Result<Value, HubError> {
		let peer = self
			.state
			.registry
			.lock()
			.active_id()
			.map(str::to_string)
			.ok_or(HubError::NoActivePeer)?;
		self.request_peer(&peer, kind, data, timeout).await
	}

	/// Sends `kind` to one session and waits for its reply data.
	pub async fn request_peer(&self, peer: &str, kind: &str, data: Value, timeout: Duration) -> Result<Value, HubError> {
		let (reply, outbound) = {
			let links = self.state.links.lock();
			let link = links.get(peer).ok_or_else(|| HubError::UnknownPeer(peer.to_string()))?;
			(link.correlator.issue(kind, timeout), link.outbound.clone())
		};
		let envelope = Envelope::request(kind, reply.id().clone(), data);
		outbound
			.send(Message::Text(envelope.to_json()?.into()))
			.map_err(|_| bridgeline_runtime::Error::Disconnected(format!("peer {peer} is disconnecting")))?;
		debug!(target = "bridgeline.hub", peer, kind, request_id = %reply.id(), "forwarded request");
		Ok(reply.await?)
	}

	/// Queues an envelope for one session.
	pub fn notify(&self, peer: &str, envelope: &Envelope) -> Result<(), HubError> {
		let text = envelope.to_json()?;
		let links = self.state.links.lock();
		let link = links.get(peer).ok_or_else(|| HubError::UnknownPeer(peer.to_string()))?;
		link.outbound
			.send(Message::Text(text.into()))
			.map_err(|_| bridgeline_runtime::Error::Disconnected(format!("peer {peer} is disconnecting")))?;
		Ok(())
	}

	/// Asks every session to close.
	pub fn close_all(&self) {
		for link in self.state.links.lock().values() {
			let _ = link.outbound.send(Message::Close(None));
		}
	}

	async fn handle_socket(self, socket: WebSocket, metadata: PeerMetadata) {
		let peer = self.state.registry.lock().register(metadata);
		let (tx, rx) = mpsc::unbounded_channel();
		let correlator = Arc::new(Correlator::new(TokenIds::new("srv")));
		self.state.links.lock().insert(
			peer.clone(),
			PeerLink {
				outbound: tx,
				correlator: Arc::clone(&correlator),
			},
		);
		info!(target = "bridgeline.hub", %peer, "browser session connected");

		let mut rx_stream = UnboundedReceiverStream::new(rx);
		let (mut ws_tx, mut ws_rx) = socket.split();
		let send_task = tokio::spawn(async move {
			while let Some(msg) = rx_stream.next().await {
				let closing = matches!(msg, Message::Close(_));
				if ws_tx.send(msg).await.is_err() || closing {
					break;
				}
			}
		});

		self.deliver(&peer, Envelope::new(WELCOME).with_data(json!({ "clientId": peer })));

		while let Some(msg) = ws_rx.next().await {
			match msg {
				Ok(Message::Text(text)) => self.handle_text(&peer, text.as_str()),
				Ok(Message::Close(_)) => break,
				Ok(_) => {}
				Err(err) => {
					warn!(target = "bridgeline.hub", %peer, error = %err, "browser websocket error");
					break;
				}
			}
		}

		self.state.links.lock().remove(&peer);
		correlator.drain_all("browser session disconnected");
		let removed = self.state.registry.lock().unregister(&peer);
		send_task.abort();

		let (was_active, was_master) = removed.map(|p| (p.is_active, p.is_master)).unwrap_or_default();
		info!(target = "bridgeline.hub", %peer, was_active, was_master, "browser session disconnected");
	}

	fn handle_text(&self, peer: &str, text: &str) {
		let envelope = match Envelope::from_json(text) {
			Ok(envelope) => envelope,
			Err(err) => {
				warn!(target = "bridgeline.hub", peer, error = %err, "dropping malformed envelope");
				return;
			}
		};
		let request_id = envelope.request_id.clone();

		match Inbound::classify(envelope) {
			Inbound::Ping { request_id } => {
				let mut pong = Envelope::new(PONG);
				pong.request_id = request_id;
				self.deliver(peer, pong);
			}
			Inbound::Pong { .. } => trace!(target = "bridgeline.hub", peer, "pong"),
			Inbound::Control(request) => self.handle_control(peer, request, request_id),
			Inbound::Reply { request_id, data, error } => {
				let correlator = self.state.links.lock().get(peer).map(|link| Arc::clone(&link.correlator));
				let Some(correlator) = correlator else { return };
				let matched = match error {
					Some(message) => correlator.reject(&request_id, bridgeline_runtime::Error::Remote(message)),
					None => correlator.resolve(&request_id, data),
				};
				if !matched {
					debug!(target = "bridgeline.hub", peer, %request_id, "reply for unknown request");
				}
			}
			Inbound::Request(envelope) => self.handle_request(peer, envelope),
			Inbound::Malformed { kind, reason } => {
				warn!(target = "bridgeline.hub", peer, %kind, %reason, "malformed control request");
				let mut error = Envelope::new(ERROR).with_error(format!("invalid {kind} payload: {reason}"));
				error.request_id = request_id;
				self.deliver(peer, error);
			}
			Inbound::Unhandled(envelope) => {
				debug!(target = "bridgeline.hub", peer, kind = %envelope.kind, "unhandled envelope");
			}
		}
	}

	fn handle_request(&self, peer: &str, envelope: Envelope) {
		let reply = match envelope.kind.as_str() {
			GET_CLIENTS => envelope.reply(json!({ "clients": self.clients() })),
			other => envelope.reply_error(format!("unsupported request type '{other}'")),
		};
		self.deliver(peer, reply);
	}

	fn handle_control(&self, peer: &str, request: ControlRequest, request_id: Option<String>) {
		debug!(target = "bridgeline.hub", peer, kind = request.kind(), "control request");
		let outcome = {
			let mut registry = self.state.registry.lock();
			match &request {
				ControlRequest::RegisterMasterClient(claim) => registry.register_master_client(peer, claim),
				ControlRequest::TakeOwnership(claim) => registry
					.update_session(peer, claim)
					.and_then(|()| registry.take_ownership(peer)),
				ControlRequest::ClaimMaster(claim) => registry
					.update_session(peer, claim)
					.and_then(|()| registry.claim_master(peer)),
				ControlRequest::ForceMaster(claim) => registry
					.update_session(peer, claim)
					.and_then(|()| registry.force_master(peer)),
				ControlRequest::CheckMasterStatus(claim) => registry
					.update_session(peer, claim)
					.and_then(|()| registry.check_master_status(peer, claim.is_master.unwrap_or(false))),
			}
		};

		let notices = match outcome {
			Ok(notices) => notices,
			Err(ArbiterError::Conflict { current_master }) => {
				info!(target = "bridgeline.hub", peer, master = %current_master.id, "master claim refused");
				vec![Directed {
					peer: peer.to_string(),
					notice: ServerNotice::MasterConflict { current_master },
				}]
			}
			Err(err) => {
				warn!(target = "bridgeline.hub", peer, error = %err, "control request failed");
				return;
			}
		};

		// The request id goes on the first notice to the requester only.
		let mut request_id = request_id;
		for Directed { peer: target, notice } in notices {
			info!(target = "bridgeline.hub", peer = %target, notice = notice.kind(), "ownership notice");
			let mut envelope = notice.into_envelope();
			if target == peer {
				envelope.request_id = request_id.take();
			}
			self.deliver(&target, envelope);
		}
		if let Some(id) = request_id {
			let ack = Envelope::new(response_type(request.kind())).with_request_id(id).with_data(json!({}));
			self.deliver(peer, ack);
		}
	}

	fn deliver(&self, peer: &str, envelope: Envelope) {
		if let Err(err) = self.notify(peer, &envelope) {
			debug!(target = "bridgeline.hub", peer, kind = %envelope.kind, error = %err, "could not deliver envelope");
		}
	}
}

async fn upgrade(
	ws: WebSocketUpgrade,
	State(hub): State<BridgeHub>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	headers: HeaderMap,
) -> Response {
	let metadata = PeerMetadata {
		address: Some(addr.to_string()),
		user_agent: headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string),
		..Default::default()
	};
	ws.on_upgrade(move |socket| hub.handle_socket(socket, metadata))
}
