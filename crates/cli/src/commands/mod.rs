mod send;
mod serve;
mod watch;

use std::future::Future;

use anyhow::{Context, Result};
use bridgeline::BridgeConfig;
use tracing::info;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

	match cli.command {
		Commands::Serve(args) => serve::run(config, args).await,
		Commands::Send(args) => send::run(config, args, cli.format).await,
		Commands::Clients(args) => send::clients(config, args, cli.format).await,
		Commands::Watch(args) => watch::run(config, args, cli.format).await,
	}
}

/// Completes on the first SIGINT or SIGTERM.
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	Ok(async move {
		tokio::select! {
			_ = sigterm.recv() => info!(target = "bridgeline.cli", "received SIGTERM, shutting down"),
			_ = sigint.recv() => info!(target = "bridgeline.cli", "received SIGINT, shutting down"),
		}
	})
}
