use anyhow::{Context, Result};
use bridgeline::{Bridge, BridgeConfig};

use crate::cli::ServeArgs;

pub async fn run(mut config: BridgeConfig, args: ServeArgs) -> Result<()> {
	if let Some(host) = args.host {
		config.host = host;
	}
	if let Some(port) = args.port {
		config.port = port;
	}
	if let Some(socket) = args.socket {
		config.socket_path = socket;
	}

	let bridge = Bridge::bind(config).await.context("Failed to start bridge")?;
	let addr = bridge.local_addr()?;
	eprintln!("hub:    ws://{addr}/ws");
	eprintln!("socket: {}", bridge.socket_path().display());

	let shutdown = super::shutdown_signal()?;
	bridge.run(shutdown).await.context("Bridge stopped with an error")
}
