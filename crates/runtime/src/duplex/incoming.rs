use bridgeline_protocol::envelope::{AUTH_ERROR, AUTH_REQUIRED, ERROR, PING, PONG};
use bridgeline_protocol::Envelope;
use serde_json::Value;

/// What an envelope received by a duplex client means.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Incoming {
	/// Server liveness ping, answered with `pong`.
	Ping { request_id: Option<String> },
	/// Answer to one of our liveness pings.
	Pong { request_id: Option<String> },
	/// Reply to a request that is still pending.
	Reply {
		request_id: String,
		data: Value,
		error: Option<String>,
	},
	/// Reply whose request already completed, timed out or never existed.
	Stray { kind: String, request_id: String },
	/// The server wants the session to authenticate again.
	AuthError { message: Option<String> },
	/// Server-initiated error not tied to a pending request.
	ServerError {
		request_id: Option<String>,
		message: String,
	},
	/// Anything else, published to topic subscribers.
	Event(Envelope),
}

impl Incoming {
	pub(crate) fn classify(envelope: Envelope, is_pending: impl Fn(&String) -> bool) -> Self {
		match envelope.kind.as_str() {
			PING => return Self::Ping { request_id: envelope.request_id },
			PONG => return Self::Pong { request_id: envelope.request_id },
			AUTH_ERROR => return Self::AuthError { message: envelope.error },
			_ => {}
		}
		if envelope.code.as_deref() == Some(AUTH_REQUIRED) {
			return Self::AuthError { message: envelope.error };
		}

		let pending = envelope.request_id.as_ref().is_some_and(&is_pending);
		if pending {
			let Envelope {
				request_id, data, error, ..
			} = envelope;
			return Self::Reply {
				request_id: request_id.unwrap_or_default(),
				data: data.unwrap_or(Value::Null),
				error,
			};
		}

		if envelope.kind == ERROR {
			return Self::ServerError {
				message: envelope.error.unwrap_or_else(|| "unspecified server error".to_string()),
				request_id: envelope.request_id,
			};
		}

		match envelope.request_id {
			Some(request_id) if envelope.is_reply() => Self::Stray {
				kind: envelope.kind,
				request_id,
			},
			_ => Self::Event(envelope),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn pending(id: &'static str) -> impl Fn(&String) -> bool {
		move |candidate| candidate == id
	}

	#[test]
	fn test_known_id_is_reply() {
		let envelope = Envelope::request("get_clients_response", "req-1", json!({"clients": []}));
		assert_eq!(
			Incoming::classify(envelope, pending("req-1")),
			Incoming::Reply {
				request_id: "req-1".into(),
				data: json!({"clients": []}),
				error: None,
			}
		);
	}

	#[test]
	fn test_error_for_pending_request_is_reply() {
		let envelope = Envelope::new("error").with_request_id("req-2").with_error("boom");
		match Incoming::classify(envelope, pending("req-2")) {
			Incoming::Reply { error, .. } => assert_eq!(error.as_deref(), Some("boom")),
			other => panic!("expected reply, got {other:?}"),
		}
	}

	#[test]
	fn test_unknown_reply_is_stray() {
		let envelope = Envelope::request("get_logs_response", "req-9", Value::Null);
		assert_eq!(
			Incoming::classify(envelope, pending("req-1")),
			Incoming::Stray {
				kind: "get_logs_response".into(),
				request_id: "req-9".into(),
			}
		);
	}

	#[test]
	fn test_error_without_pending_request_is_server_error() {
		let envelope = Envelope::new("error").with_error("rate limited");
		assert_eq!(
			Incoming::classify(envelope, pending("x")),
			Incoming::ServerError {
				request_id: None,
				message: "rate limited".into(),
			}
		);
	}

	#[test]
	fn test_auth_error_by_type_or_code() {
		let by_type = Envelope::new("auth_error").with_error("token expired");
		assert_eq!(
			Incoming::classify(by_type, pending("x")),
			Incoming::AuthError {
				message: Some("token expired".into())
			}
		);

		let mut by_code = Envelope::new("error");
		by_code.code = Some("AUTH_REQUIRED".into());
		assert!(matches!(Incoming::classify(by_code, pending("x")), Incoming::AuthError { .. }));
	}

	#[test]
	fn test_everything_else_is_an_event() {
		let envelope = Envelope::new("master_kicked").with_data(json!({"newMaster": {"id": "b"}}));
		assert!(matches!(Incoming::classify(envelope, pending("x")), Incoming::Event(e) if e.kind == "master_kicked"));
	}

	#[test]
	fn test_ping_and_pong_take_precedence() {
		assert_eq!(
			Incoming::classify(Envelope::new("ping").with_request_id("p1"), pending("p1")),
			Incoming::Ping {
				request_id: Some("p1".into())
			}
		);
		assert_eq!(
			Incoming::classify(Envelope::new("pong").with_request_id("p1"), pending("p1")),
			Incoming::Pong {
				request_id: Some("p1".into())
			}
		);
	}
}
