//! bridgeline runtime - correlation and the two transports
//!
//! - **Correlator**: maps request/response traffic onto awaitable futures
//! - **IPC**: newline-delimited JSON over a Unix socket, embedded server and controller client
//! - **Duplex**: reconnecting WebSocket client with liveness pings and topic subscriptions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   newline JSON    ┌───────────────┐   WebSocket   ┌──────────────┐
//! │  IpcClient   │ ────────────────▶ │   IpcServer   │               │ DuplexChannel│
//! │ (controller) │ ◀──────────────── │  (embedded)   │               │  (session)   │
//! └──────┬───────┘    targeted resp  └───────────────┘               └──────┬───────┘
//!        │                                                                  │
//!        └──────────────────── Correlator (one per channel) ────────────────┘
//! ```

pub mod correlator;
pub mod duplex;
pub mod error;
pub mod framing;
#[cfg(unix)]
pub mod ipc;

pub use correlator::{Correlator, IdSource, PendingReply, SequentialIds, TokenIds};
pub use duplex::{
	Backoff, ChannelEvent, ChannelState, ConnectionStatus, DuplexChannel, DuplexOptions, ReconnectPolicy,
};
pub use error::{Error, Result};
pub use framing::LineBuffer;
#[cfg(unix)]
pub use ipc::{ConnectionId, ConnectionInfo, IpcClient, IpcClientOptions, IpcInbound, IpcServer, IpcServerHandle};
