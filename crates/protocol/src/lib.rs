//! Wire types shared by every bridgeline channel.
//!
//! - [`envelope`] - JSON envelope exchanged over the browser WebSocket (duplex channel)
//! - [`ipc`] - newline-delimited frames exchanged over the local control socket
//! - [`control`] - dev-bridge ownership requests and the notices the server answers with
//! - [`inbound`] - server-side classification of incoming envelopes
//!
//! Nothing in this crate performs I/O.

pub mod control;
pub mod envelope;
pub mod inbound;
pub mod ipc;

pub use control::{ControlRequest, PeerSummary, ServerNotice, SessionClaim};
pub use envelope::{Envelope, response_type};
pub use inbound::Inbound;
pub use ipc::{IpcFrame, IpcRequest, IpcResponse};

/// Milliseconds since the Unix epoch, used for `timestamp` fields.
pub fn now_millis() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}
