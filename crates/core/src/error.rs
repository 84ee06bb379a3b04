use std::path::PathBuf;

use bridgeline_protocol::PeerSummary;
use thiserror::Error;

/// Refusals from the [`ClientRegistry`](crate::registry::ClientRegistry).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArbiterError {
	#[error("Unknown peer: {0}")]
	UnknownPeer(String),

	/// Another peer holds master and the caller used the non-forcing path.
	#[error("Conflict: {} is already master", current_master.id)]
	Conflict { current_master: PeerSummary },
}

#[derive(Debug, Error)]
pub enum HubError {
	#[error("No active browser session")]
	NoActivePeer,

	#[error("Unknown peer: {0}")]
	UnknownPeer(String),

	#[error("Failed to bind hub to {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Runtime(#[from] bridgeline_runtime::Error),
}

impl HubError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, HubError::Runtime(err) if err.is_timeout())
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Failed to read config {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse config {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("Invalid value for {name}: {value:?}")]
	InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("Unknown target: {0}")]
	UnknownTarget(String),

	#[error(transparent)]
	Hub(#[from] HubError),

	#[error(transparent)]
	Runtime(#[from] bridgeline_runtime::Error),
}
