//! Duplex channel envelope.
//!
//! Every WebSocket text frame between a browser session and the server is one
//! [`Envelope`]:
//!
//! ```text
//! { "type": "get_clients", "requestId": "req-1700000000000-3", "data": {...} }
//! { "type": "get_clients_response", "requestId": "req-1700000000000-3", "data": {...} }
//! ```
//!
//! A request that expects an answer carries a `requestId`; the answer copies it
//! verbatim and uses the `<type>_response` naming convention. Control frames
//! (`ping`/`pong`) may omit the id.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Liveness ping.
pub const PING: &str = "ping";
/// Liveness answer.
pub const PONG: &str = "pong";
/// Server-initiated failure, with or without a correlation id.
pub const ERROR: &str = "error";
/// Authentication is required before the server accepts further requests.
pub const AUTH_ERROR: &str = "auth_error";
/// Code carried by [`AUTH_ERROR`] envelopes.
pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
/// Suffix appended to a request type to name its reply.
pub const RESPONSE_SUFFIX: &str = "_response";

/// Returns the reply type for a request type (`get_clients` -> `get_clients_response`).
pub fn response_type(request_type: &str) -> String {
	format!("{request_type}{RESPONSE_SUFFIX}")
}

/// A single message on the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireEnvelope")]
pub struct Envelope {
	/// Message type tag.
	#[serde(rename = "type")]
	pub kind: String,
	/// Correlation id. On input, `id` is used when `requestId` is absent and
	/// numbers are coerced to strings.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub request_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Machine-readable error code (e.g. [`AUTH_REQUIRED`]).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	/// Milliseconds since the Unix epoch; fractional input is truncated.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<u64>,
}

/// Lenient input shape of [`Envelope`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default, deserialize_with = "deserialize_request_id")]
	request_id: Option<String>,
	#[serde(default, deserialize_with = "deserialize_request_id")]
	id: Option<String>,
	#[serde(default)]
	data: Option<Value>,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	code: Option<String>,
	#[serde(default, deserialize_with = "deserialize_timestamp")]
	timestamp: Option<u64>,
}

impl From<WireEnvelope> for Envelope {
	fn from(wire: WireEnvelope) -> Self {
		Self {
			kind: wire.kind,
			request_id: wire.request_id.or(wire.id),
			data: wire.data,
			error: wire.error,
			code: wire.code,
			timestamp: wire.timestamp,
		}
	}
}

impl Envelope {
	/// Fire-and-forget envelope with no payload.
	pub fn new(kind: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			request_id: None,
			data: None,
			error: None,
			code: None,
			timestamp: Some(crate::now_millis()),
		}
	}

	/// Request envelope carrying a correlation id.
	pub fn request(kind: impl Into<String>, request_id: impl Into<String>, data: Value) -> Self {
		Self {
			request_id: Some(request_id.into()),
			data: Some(data),
			..Self::new(kind)
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}

	pub fn with_error(mut self, error: impl Into<String>) -> Self {
		self.error = Some(error.into());
		self
	}

	pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());
		self
	}

	/// Builds the reply to this envelope: `<type>_response` (or `pong` for `ping`)
	/// with the same correlation id.
	pub fn reply(&self, data: Value) -> Self {
		let kind = if self.kind == PING {
			PONG.to_string()
		} else {
			response_type(&self.kind)
		};
		Self {
			request_id: self.request_id.clone(),
			data: Some(data),
			..Self::new(kind)
		}
	}

	/// Builds an error reply to this envelope, keeping the correlation id.
	pub fn reply_error(&self, error: impl Into<String>) -> Self {
		Self {
			request_id: self.request_id.clone(),
			error: Some(error.into()),
			..Self::new(response_type(&self.kind))
		}
	}

	/// True for `<name>_response` and `pong` envelopes.
	pub fn is_reply(&self) -> bool {
		self.kind == PONG || self.kind.ends_with(RESPONSE_SUFFIX)
	}

	/// The request type a reply answers (`get_clients_response` -> `get_clients`).
	pub fn answered_type(&self) -> Option<&str> {
		if self.kind == PONG {
			return Some(PING);
		}
		self.kind.strip_suffix(RESPONSE_SUFFIX)
	}

	/// Payload, or `null` when absent.
	pub fn data_or_null(&self) -> Value {
		self.data.clone().unwrap_or(Value::Null)
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	pub fn from_json(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}
}

fn deserialize_request_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(Value::String(s)) => Some(s),
		Some(Value::Number(n)) => Some(n.to_string()),
		_ => None,
	})
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(value.as_ref().and_then(Value::as_f64).filter(|ms| *ms >= 0.0).map(|ms| ms as u64))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_serializes_request_with_camel_case_id() {
		let env = Envelope::request("get_clients", "req-1", json!({}));
		let value = serde_json::to_value(&env).unwrap();
		assert_eq!(value["type"], "get_clients");
		assert_eq!(value["requestId"], "req-1");
		assert!(value.get("error").is_none());
	}

	#[test]
	fn test_accepts_id_alias_and_numeric_ids() {
		let env = Envelope::from_json(r#"{"type":"x_response","id":42}"#).unwrap();
		assert_eq!(env.request_id.as_deref(), Some("42"));
	}

	#[test]
	fn test_reply_copies_correlation_id() {
		let req = Envelope::request("get_clients", "abc", json!({}));
		let reply = req.reply(json!({"clients": []}));
		assert_eq!(reply.kind, "get_clients_response");
		assert_eq!(reply.request_id.as_deref(), Some("abc"));
		assert_eq!(reply.answered_type(), Some("get_clients"));
	}

	#[test]
	fn test_ping_reply_is_pong() {
		let ping = Envelope::new(PING).with_request_id("p1");
		let pong = ping.reply(Value::Null);
		assert_eq!(pong.kind, PONG);
		assert!(pong.is_reply());
		assert_eq!(pong.answered_type(), Some(PING));
	}

	#[test]
	fn test_request_id_wins_over_id() {
		let env = Envelope::from_json(r#"{"type":"console_log","id":"log-7","requestId":"r1","data":{}}"#).unwrap();
		assert_eq!(env.request_id.as_deref(), Some("r1"));
		assert_eq!(env.data, Some(json!({})));
	}

	#[test]
	fn test_fractional_timestamp_is_accepted() {
		let env = Envelope::from_json(r#"{"type":"console_log","timestamp":1700000000000.5}"#).unwrap();
		assert_eq!(env.timestamp, Some(1_700_000_000_000));

		let env = Envelope::from_json(r#"{"type":"console_log","timestamp":"soon"}"#).unwrap();
		assert_eq!(env.timestamp, None);
	}

	#[test]
	fn test_missing_type_is_rejected() {
		assert!(Envelope::from_json(r#"{"requestId":"1"}"#).is_err());
	}
}
