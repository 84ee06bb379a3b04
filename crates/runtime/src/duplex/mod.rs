//! Reconnecting WebSocket client speaking the JSON [`Envelope`](bridgeline_protocol::Envelope) protocol.
//!
//! A [`DuplexChannel`] owns one supervisor task that connects, runs a session
//! until the transport drops, then reconnects on an exponential [`Backoff`].
//! While a session is open:
//!
//! - [`DuplexChannel::send`] queues envelopes on the session's writer (FIFO)
//! - [`DuplexChannel::send_request`] correlates replies by `requestId`
//! - a liveness task pings every `ping_interval`; a missed pong forces a reconnect
//! - everything that is not a reply or control frame goes to topic subscribers
//!
//! Nothing is queued across sessions. When a session ends, every pending
//! request fails with [`Error::Disconnected`](crate::Error::Disconnected) and
//! `send` fails fast until the next session opens.

mod backoff;
mod channel;
mod incoming;

pub use backoff::{Backoff, ReconnectPolicy};
pub use channel::DuplexChannel;

use std::time::Duration;

use serde::Serialize;

/// Topic that receives every published envelope regardless of its type.
pub const ALL_TOPICS: &str = "*";

/// Lifecycle state of a [`DuplexChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
	Connecting,
	Open,
	Reconnecting,
	Closed,
}

/// Everything a connectivity indicator needs, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
	pub state: ChannelState,
	pub last_error: Option<String>,
	/// Reconnect attempts since the last successful open.
	pub reconnect_attempts: u32,
	/// Set when the channel closed because reconnecting gave up.
	pub exhausted: bool,
}

impl Default for ConnectionStatus {
	fn default() -> Self {
		Self {
			state: ChannelState::Closed,
			last_error: None,
			reconnect_attempts: 0,
			exhausted: false,
		}
	}
}

/// Lifecycle notifications broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
	Connected,
	Disconnected { reason: String },
	ReconnectScheduled { attempt: u32, delay: Duration },
	ReconnectExhausted { attempts: u32 },
	AuthRequired { message: Option<String> },
	ServerError { request_id: Option<String>, message: String },
}

/// Connection settings for a [`DuplexChannel`].
#[derive(Debug, Clone)]
pub struct DuplexOptions {
	/// `ws://` or `wss://` endpoint.
	pub url: String,
	pub ping_interval: Duration,
	pub ping_timeout: Duration,
	/// Default timeout for [`DuplexChannel::request`].
	pub request_timeout: Duration,
	pub reconnect: ReconnectPolicy,
}

impl DuplexOptions {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			ping_interval: Duration::from_secs(30),
			ping_timeout: Duration::from_secs(5),
			request_timeout: Duration::from_secs(30),
			reconnect: ReconnectPolicy::default(),
		}
	}
}
