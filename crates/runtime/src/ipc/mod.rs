//! Out-of-process control channel over a Unix domain socket.
//!
//! The embedded server ([`IpcServer`]) accepts any number of controller
//! processes ([`IpcClient`]). Frames are newline-delimited JSON (see
//! [`bridgeline_protocol::ipc`]); each connection keeps its own read buffer and
//! writer task, and responses only ever go back to the connection that asked.

mod client;
mod server;

pub use client::{IpcClient, IpcClientOptions};
pub use server::{ConnectionId, ConnectionInfo, IpcInbound, IpcServer, IpcServerHandle};

use std::path::PathBuf;

/// Default socket file name inside the runtime directory.
pub const SOCKET_FILE_NAME: &str = "bridgeline.sock";

/// Default request timeout for [`IpcClient::send_message`].
pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Returns the default socket path under `runtime_dir`, or the temp dir when absent.
pub fn default_socket_path(runtime_dir: Option<PathBuf>) -> PathBuf {
	runtime_dir.unwrap_or_else(std::env::temp_dir).join(SOCKET_FILE_NAME)
}

#[cfg(test)]
mod tests;
