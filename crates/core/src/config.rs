//! Bridge configuration.
//!
//! Values are layered: defaults, then an optional JSON file, then the
//! `BRIDGELINE_SOCKET` / `BRIDGELINE_PORT` environment variables. Command-line
//! flags are applied on top by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bridgeline_runtime::duplex::{DuplexOptions, ReconnectPolicy};
use bridgeline_runtime::ipc::{IpcClientOptions, default_socket_path};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_SOCKET: &str = "BRIDGELINE_SOCKET";
pub const ENV_PORT: &str = "BRIDGELINE_PORT";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8765;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
	/// Control socket for IPC clients.
	pub socket_path: PathBuf,
	/// Interface the dev-bridge hub listens on.
	pub host: String,
	pub port: u16,
	pub ping_interval_ms: u64,
	pub ping_timeout_ms: u64,
	pub reconnect_base_ms: u64,
	pub reconnect_max_ms: u64,
	pub reconnect_max_attempts: u32,
	pub request_timeout_ms: u64,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			socket_path: default_socket_path(dirs::runtime_dir()),
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			ping_interval_ms: 30_000,
			ping_timeout_ms: 5_000,
			reconnect_base_ms: 1_000,
			reconnect_max_ms: 30_000,
			reconnect_max_attempts: 10,
			request_timeout_ms: 30_000,
		}
	}
}

impl BridgeConfig {
	/// Defaults, overlaid with `path` when given, then with the environment.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_env(|name| std::env::var(name).ok())?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Applies `BRIDGELINE_*` overrides looked up through `lookup`.
	pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
		if let Some(socket) = lookup(ENV_SOCKET).filter(|s| !s.is_empty()) {
			self.socket_path = PathBuf::from(socket);
		}
		if let Some(port) = lookup(ENV_PORT).filter(|s| !s.is_empty()) {
			self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
				name: ENV_PORT,
				value: port,
			})?;
		}
		Ok(())
	}

	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// WebSocket URL browser sessions connect to.
	pub fn ws_url(&self) -> String {
		format!("ws://{}:{}/ws", self.host, self.port)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn reconnect_policy(&self) -> ReconnectPolicy {
		ReconnectPolicy {
			base_delay: Duration::from_millis(self.reconnect_base_ms),
			max_delay: Duration::from_millis(self.reconnect_max_ms),
			max_attempts: self.reconnect_max_attempts,
		}
	}

	pub fn duplex_options(&self, url: impl Into<String>) -> DuplexOptions {
		DuplexOptions {
			url: url.into(),
			ping_interval: Duration::from_millis(self.ping_interval_ms),
			ping_timeout: Duration::from_millis(self.ping_timeout_ms),
			request_timeout: self.request_timeout(),
			reconnect: self.reconnect_policy(),
		}
	}

	pub fn ipc_client_options(&self) -> IpcClientOptions {
		IpcClientOptions {
			request_timeout: self.request_timeout(),
			..IpcClientOptions::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::io::Write;

	use super::*;

	fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		move |name| map.get(name).cloned()
	}

	#[test]
	fn test_defaults() {
		let config = BridgeConfig::default();
		assert_eq!(config.host, "127.0.0.1");
		assert_eq!(config.port, 8765);
		assert_eq!(config.ping_interval_ms, 30_000);
		assert_eq!(config.reconnect_max_attempts, 10);
		assert!(config.socket_path.ends_with("bridgeline.sock"));
		assert_eq!(config.ws_url(), "ws://127.0.0.1:8765/ws");
	}

	#[test]
	fn test_partial_file_keeps_remaining_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"port": 9001, "request_timeout_ms": 500}}"#).unwrap();

		let config = BridgeConfig::from_file(file.path()).unwrap();
		assert_eq!(config.port, 9001);
		assert_eq!(config.request_timeout(), Duration::from_millis(500));
		assert_eq!(config.host, DEFAULT_HOST);
		assert_eq!(config.reconnect_base_ms, 1_000);
	}

	#[test]
	fn test_unparsable_file_is_reported() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "port = 1").unwrap();
		assert!(matches!(BridgeConfig::from_file(file.path()), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn test_env_overrides_socket_and_port() {
		let mut config = BridgeConfig::default();
		config
			.apply_env(env(&[(ENV_SOCKET, "/tmp/x.sock"), (ENV_PORT, "9100")]))
			.unwrap();
		assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
		assert_eq!(config.port, 9100);
	}

	#[test]
	fn test_invalid_port_env_is_rejected() {
		let mut config = BridgeConfig::default();
		let err = config.apply_env(env(&[(ENV_PORT, "eighty")])).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidEnv { name: ENV_PORT, .. }));
	}

	#[test]
	fn test_duplex_options_follow_tunables() {
		let config = BridgeConfig {
			ping_interval_ms: 100,
			reconnect_base_ms: 10,
			reconnect_max_ms: 80,
			reconnect_max_attempts: 4,
			..BridgeConfig::default()
		};
		let options = config.duplex_options("ws://localhost:1/ws");
		assert_eq!(options.ping_interval, Duration::from_millis(100));
		assert_eq!(options.reconnect.max_delay, Duration::from_millis(80));
		assert_eq!(options.reconnect.max_attempts, 4);
	}
}
