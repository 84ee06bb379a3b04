//! Error types for the bridgeline runtime.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the correlator and the channels.
#[derive(Debug, Error)]
pub enum Error {
	/// No correlated response arrived within the bound.
	#[error("Timeout: no response to '{request_type}' after {}ms", after.as_millis())]
	Timeout { request_type: String, after: Duration },

	/// The channel closed while the request was outstanding, or was not open.
	#[error("Disconnected: {0}")]
	Disconnected(String),

	/// Ownership is held by another peer.
	#[error("Conflict: {0}")]
	Conflict(String),

	/// Malformed frame or envelope.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The remote end answered with an error.
	#[error("Remote error: {0}")]
	Remote(String),

	/// Failed to establish the transport.
	#[error("Failed to connect to {endpoint}: {reason}")]
	ConnectionFailed { endpoint: String, reason: String },

	/// Reconnection gave up after the configured number of attempts.
	#[error("Reconnect attempts exhausted after {attempts} tries")]
	ReconnectExhausted { attempts: u32 },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// WebSocket transport error.
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true if the request failed because the channel went away.
	pub fn is_disconnected(&self) -> bool {
		matches!(self, Error::Disconnected(_))
	}

	/// Returns true if this is a remote error.
	pub fn is_remote(&self) -> bool {
		matches!(self, Error::Remote(_))
	}
}
