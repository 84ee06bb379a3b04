use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bridgeline::BridgeConfig;
use bridgeline::hub::GET_CLIENTS;
use bridgeline::protocol::ipc::{SOURCE_MCP, TARGET_WEB};
use bridgeline::runtime::IpcClient;
use serde_json::{Value, json};

use crate::cli::{ClientArgs, OutputFormat, SendArgs};
use crate::output::print_json;

pub async fn run(config: BridgeConfig, args: SendArgs, format: OutputFormat) -> Result<()> {
	let data = match args.data.as_deref() {
		Some(raw) => serde_json::from_str(raw).context("--data is not valid JSON")?,
		None => json!({}),
	};
	let timeout = args
		.timeout_ms
		.map(Duration::from_millis)
		.unwrap_or_else(|| config.request_timeout());

	let response = request(&config, args.socket, &args.source, &args.target, &args.kind, data, timeout).await?;
	print_json(&response, format)
}

pub async fn clients(config: BridgeConfig, args: ClientArgs, format: OutputFormat) -> Result<()> {
	let timeout = config.request_timeout();
	let response = request(&config, args.socket, SOURCE_MCP, TARGET_WEB, GET_CLIENTS, json!({}), timeout).await?;
	print_json(&response["clients"], format)
}

async fn request(
	config: &BridgeConfig,
	socket: Option<PathBuf>,
	source: &str,
	target: &str,
	kind: &str,
	data: Value,
	timeout: Duration,
) -> Result<Value> {
	let socket = socket.unwrap_or_else(|| config.socket_path.clone());
	let client = IpcClient::connect(&socket, config.ipc_client_options())
		.await
		.with_context(|| format!("Is the bridge running? No server at {}", socket.display()))?;

	let response = client
		.send_message_as(source, target, kind, data, timeout)
		.await
		.with_context(|| format!("{kind} request failed"));
	client.close();
	response
}
