//! bridgeline - dev-bridge between browser sessions and local tools
//!
//! - [`registry`]: connected sessions and the active/master ownership arbiter
//! - [`hub`]: WebSocket endpoint browser sessions connect to
//! - [`bridge`]: hub plus IPC control socket, forwarding tool requests to the active session
//! - [`config`]: layered configuration
//!
//! Transports and correlation live in [`bridgeline_runtime`], wire types in
//! [`bridgeline_protocol`]; both are re-exported.

pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;
pub mod registry;

pub use bridge::Bridge;
pub use bridgeline_protocol as protocol;
pub use bridgeline_runtime as runtime;
pub use config::BridgeConfig;
pub use error::{ArbiterError, BridgeError, ConfigError, HubError};
pub use hub::BridgeHub;
pub use registry::{ClientRegistry, Directed, PeerId, PeerMetadata, PeerSnapshot};
