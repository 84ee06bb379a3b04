//! Frames exchanged over the local control socket.
//!
//! Each frame is one JSON document terminated by `\n`. Requests are sent by the
//! controller process (the client) and answered by the embedded server:
//!
//! ```text
//! {"id":7,"type":"get_logs","data":{},"source":"mcp","target":"web","timestamp":1700000000000}
//! {"id":7,"type":"response","data":{...},"error":null,"success":true,"timestamp":1700000000012}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag reserved for response frames.
pub const RESPONSE_TYPE: &str = "response";
/// Routing name of the browser side of the bridge.
pub const TARGET_WEB: &str = "web";
/// Routing name of the controller (IDE tool) side of the bridge.
pub const SOURCE_MCP: &str = "mcp";

/// Request frame sent by an IPC client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcRequest {
	pub id: u64,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub data: Value,
	#[serde(default)]
	pub source: String,
	#[serde(default)]
	pub target: String,
	#[serde(default)]
	pub timestamp: u64,
}

impl IpcRequest {
	pub fn new(id: u64, kind: impl Into<String>, data: Value, source: impl Into<String>, target: impl Into<String>) -> Self {
		Self {
			id,
			kind: kind.into(),
			data,
			source: source.into(),
			target: target.into(),
			timestamp: crate::now_millis(),
		}
	}
}

/// Response frame written back to the connection that sent the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
	pub id: u64,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub data: Value,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub timestamp: u64,
}

impl IpcResponse {
	pub fn new(id: u64, data: Value, error: Option<String>, success: bool) -> Self {
		Self {
			id,
			kind: RESPONSE_TYPE.to_string(),
			data,
			error,
			success,
			timestamp: crate::now_millis(),
		}
	}

	pub fn ok(id: u64, data: Value) -> Self {
		Self::new(id, data, None, true)
	}

	pub fn failure(id: u64, error: impl Into<String>) -> Self {
		Self::new(id, Value::Null, Some(error.into()), false)
	}
}

/// A parsed IPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcFrame {
	Request(IpcRequest),
	Response(IpcResponse),
}

impl IpcFrame {
	/// Parses one frame (without its trailing newline).
	///
	/// Frames whose `type` is `"response"` are responses, everything else is a request.
	pub fn parse(line: &str) -> serde_json::Result<Self> {
		let value: Value = serde_json::from_str(line)?;
		if value.get("type").and_then(Value::as_str) == Some(RESPONSE_TYPE) {
			Ok(Self::Response(serde_json::from_value(value)?))
		} else {
			Ok(Self::Request(serde_json::from_value(value)?))
		}
	}

	pub fn id(&self) -> u64 {
		match self {
			Self::Request(req) => req.id,
			Self::Response(resp) => resp.id,
		}
	}
}

/// Serializes a frame and appends the `\n` terminator.
pub fn encode_line<T: Serialize>(frame: &T) -> serde_json::Result<String> {
	let mut line = serde_json::to_string(frame)?;
	line.push('\n');
	Ok(line)
}
