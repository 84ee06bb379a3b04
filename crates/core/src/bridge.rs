//! Composition root: the dev-bridge hub plus the IPC control socket.
//!
//! IPC requests targeted at `web` are answered locally (`get_clients`, `ping`)
//! or forwarded to the active browser session. Every request gets exactly one
//! response on the connection it came from.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bridgeline_protocol::envelope::PING;
use bridgeline_protocol::ipc::TARGET_WEB;
use bridgeline_protocol::{IpcRequest, IpcResponse};
use bridgeline_runtime::ipc::{IpcInbound, IpcServer, IpcServerHandle};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, HubError};
use crate::hub::{BridgeHub, GET_CLIENTS};

/// A bound, not yet running bridge.
pub struct Bridge {
	config: BridgeConfig,
	hub: BridgeHub,
	listener: TcpListener,
	ipc: IpcServer,
	inbound: mpsc::UnboundedReceiver<IpcInbound>,
}

impl Bridge {
	/// Binds the hub's TCP listener and the IPC socket.
	pub async fn bind(config: BridgeConfig) -> Result<Self, BridgeError> {
		let listener = BridgeHub::bind(&config.bind_addr()).await?;
		let (ipc, inbound) = IpcServer::bind(&config.socket_path)?;
		Ok(Self {
			config,
			hub: BridgeHub::new(),
			listener,
			ipc,
			inbound,
		})
	}

	pub fn hub(&self) -> &BridgeHub {
		&self.hub
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
		Ok(self.listener.local_addr().map_err(HubError::from)?)
	}

	pub fn socket_path(&self) -> &Path {
		self.ipc.path()
	}

	/// Runs until `shutdown` completes, then closes every session and the socket.
	pub async fn run<F>(self, shutdown: F) -> Result<(), BridgeError>
	where
		F: Future<Output = ()> + Send,
	{
		let Self {
			config,
			hub,
			listener,
			ipc,
			mut inbound,
		} = self;
		let timeout = config.request_timeout();
		let ipc_handle = ipc.handle();
		let (stop_tx, mut stop_rx) = watch::channel(false);

		let hub_task = {
			let hub = hub.clone();
			tokio::spawn(async move {
				let stopped = async move {
					let _ = stop_rx.wait_for(|stop| *stop).await;
				};
				hub.serve(listener, stopped).await
			})
		};
		let ipc_task = tokio::spawn(ipc.run());
		info!(target = "bridgeline.bridge", socket = %config.socket_path.display(), ws = %config.ws_url(), "bridge running");

		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				_ = &mut shutdown => break,
				msg = inbound.recv() => {
					let Some(msg) = msg else { break };
					tokio::spawn(handle_ipc(hub.clone(), ipc_handle.clone(), msg, timeout));
				}
			}
		}

		info!(target = "bridgeline.bridge", "bridge shutting down");
		ipc_handle.shutdown();
		hub.close_all();
		let _ = stop_tx.send(true);

		match ipc_task.await {
			Ok(Err(err)) => warn!(target = "bridgeline.bridge", error = %err, "IPC server stopped with error"),
			Err(err) => warn!(target = "bridgeline.bridge", error = %err, "IPC server task failed"),
			Ok(Ok(())) => {}
		}
		match hub_task.await {
			Ok(result) => result?,
			Err(err) => warn!(target = "bridgeline.bridge", error = %err, "hub task failed"),
		}
		Ok(())
	}
}

async fn handle_ipc(hub: BridgeHub, ipc: IpcServerHandle, msg: IpcInbound, timeout: Duration) {
	let IpcInbound { connection, request } = msg;
	let response = match route(&hub, &request, timeout).await {
		Ok(data) => IpcResponse::ok(request.id, data),
		Err(err) => {
			debug!(target = "bridgeline.bridge", id = request.id, kind = %request.kind, error = %err, "IPC request failed");
			IpcResponse::failure(request.id, err.to_string())
		}
	};
	if let Err(err) = ipc.respond(connection, response) {
		debug!(target = "bridgeline.bridge", connection, error = %err, "IPC client went away before the response");
	}
}

async fn route(hub: &BridgeHub, request: &IpcRequest, timeout: Duration) -> Result<Value, BridgeError> {
	if request.target != TARGET_WEB {
		return Err(BridgeError::UnknownTarget(request.target.clone()));
	}
	match request.kind.as_str() {
		GET_CLIENTS => Ok(json!({ "clients": hub.clients() })),
		PING => Ok(json!({ "pong": true, "timestamp": bridgeline_protocol::now_millis() })),
		kind => Ok(hub.forward_to_active(kind, request.data.clone(), timeout).await?),
	}
}
