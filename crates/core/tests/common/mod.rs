#![allow(dead_code)]

use std::time::Duration;

use bridgeline::hub::WELCOME;
use bridgeline::protocol::{ControlRequest, Envelope, ServerNotice, SessionClaim};
use bridgeline::runtime::{DuplexChannel, DuplexOptions};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// A duplex client standing in for a browser tab.
pub struct Browser {
	pub id: String,
	pub channel: DuplexChannel,
}

impl Browser {
	pub async fn connect(url: &str) -> Self {
		let channel = DuplexChannel::new(DuplexOptions::new(url));
		let mut welcome = channel.subscribe(WELCOME);
		channel.connect();
		let envelope = recv(&mut welcome).await;
		let id = envelope.data_or_null()["clientId"].as_str().unwrap().to_string();
		Self { id, channel }
	}

	pub fn control(&self, request: ControlRequest) {
		self.channel.send(&request.into_envelope()).unwrap();
	}

	pub fn claim(&self, session: &str) -> SessionClaim {
		SessionClaim {
			session_id: Some(session.to_string()),
			url: Some(format!("http://localhost:5173/{session}")),
			is_master: Some(true),
		}
	}
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
	tokio::time::timeout(WAIT, rx.recv())
		.await
		.expect("timed out waiting for envelope")
		.expect("subscription closed")
}

pub async fn recv_notice(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> ServerNotice {
	let envelope = recv(rx).await;
	ServerNotice::from_envelope(&envelope).unwrap_or_else(|| panic!("not a notice: {envelope:?}"))
}

pub async fn eventually(mut check: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT, async {
		while !check() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition never became true");
}
