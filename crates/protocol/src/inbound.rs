//! Server-side classification of envelopes received from browser sessions.

use serde_json::Value;

use crate::control::ControlRequest;
use crate::envelope::{ERROR, Envelope, PING, PONG};

/// Every envelope a browser session can send, as a closed set.
///
/// [`Inbound::classify`] is the single place deciding what an envelope means;
/// the hub matches on the result exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	/// Liveness ping from the browser; answer with `pong`.
	Ping { request_id: Option<String> },
	/// Answer to a ping the server sent.
	Pong { request_id: Option<String> },
	/// Ownership request.
	Control(ControlRequest),
	/// Answer to a request the server forwarded to this session.
	Reply {
		request_id: String,
		data: Value,
		error: Option<String>,
	},
	/// Request from the browser expecting a `<type>_response`.
	Request(Envelope),
	/// Envelope with a control type whose payload could not be decoded.
	Malformed { kind: String, reason: String },
	/// Anything else (fire-and-forget events).
	Unhandled(Envelope),
}

impl Inbound {
	pub fn classify(envelope: Envelope) -> Self {
		match envelope.kind.as_str() {
			PING => return Self::Ping { request_id: envelope.request_id },
			PONG => return Self::Pong { request_id: envelope.request_id },
			_ => {}
		}

		if let Some(decoded) = ControlRequest::from_envelope(&envelope) {
			return match decoded {
				Ok(request) => Self::Control(request),
				Err(err) => Self::Malformed {
					kind: envelope.kind,
					reason: err.to_string(),
				},
			};
		}

		let is_reply = envelope.is_reply() || envelope.kind == ERROR;
		match envelope.request_id {
			Some(request_id) if is_reply => Self::Reply {
				request_id,
				data: envelope.data.unwrap_or(Value::Null),
				error: envelope.error,
			},
			Some(_) => Self::Request(envelope),
			None => Self::Unhandled(envelope),
		}
	}
}
