use anyhow::{Context, Result, anyhow};
use bridgeline::BridgeConfig;
use bridgeline::protocol::{ControlRequest, SessionClaim};
use bridgeline::runtime::duplex::ALL_TOPICS;
use bridgeline::runtime::{ChannelEvent, DuplexChannel};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{ClaimArgs, OutputFormat, WatchArgs};
use crate::output::print_json;

pub async fn run(config: BridgeConfig, args: WatchArgs, format: OutputFormat) -> Result<()> {
	let url = args.url.unwrap_or_else(|| config.ws_url());
	let request = ownership_request(&args.claim, args.session);

	let channel = DuplexChannel::new(config.duplex_options(url.as_str()));
	let mut inbound = channel.subscribe(ALL_TOPICS);
	let mut events = channel.events();
	channel.connect();
	info!(target = "bridgeline.cli", %url, "watching hub");

	let shutdown = super::shutdown_signal()?;
	tokio::pin!(shutdown);

	let outcome = loop {
		tokio::select! {
			_ = &mut shutdown => break Ok(()),
			event = events.recv() => match event {
				Ok(ChannelEvent::ReconnectExhausted { attempts }) => {
					break Err(anyhow!("Gave up on {url} after {attempts} reconnect attempts"));
				}
				Ok(event) => {
					eprintln!("[{}]", describe(&event));
					// Ownership is per connection, so it is requested again after every reconnect.
					if event == ChannelEvent::Connected {
						if let Some(request) = &request {
							channel
								.send(&request.clone().into_envelope())
								.with_context(|| format!("Failed to send {}", request.kind()))?;
						}
					}
				}
				Err(RecvError::Lagged(skipped)) => {
					warn!(target = "bridgeline.cli", skipped, "missed channel events");
				}
				Err(RecvError::Closed) => break Ok(()),
			},
			envelope = inbound.recv() => match envelope {
				Some(envelope) => print_json(&envelope, format)?,
				None => break Ok(()),
			},
		}
	};

	channel.close().await;
	outcome
}

fn ownership_request(claim: &ClaimArgs, session: Option<String>) -> Option<ControlRequest> {
	let wants_master = claim.claim_master || claim.force_master;
	let session = SessionClaim {
		session_id: session,
		url: None,
		is_master: wants_master.then_some(true),
	};
	if claim.claim_master {
		Some(ControlRequest::ClaimMaster(session))
	} else if claim.force_master {
		Some(ControlRequest::ForceMaster(session))
	} else if claim.take_ownership {
		Some(ControlRequest::TakeOwnership(session))
	} else {
		None
	}
}

fn describe(event: &ChannelEvent) -> String {
	match event {
		ChannelEvent::Connected => "connected".to_string(),
		ChannelEvent::Disconnected { reason } => format!("disconnected: {reason}"),
		ChannelEvent::ReconnectScheduled { attempt, delay } => {
			format!("reconnect #{attempt} in {}ms", delay.as_millis())
		}
		ChannelEvent::ReconnectExhausted { attempts } => format!("gave up after {attempts} attempts"),
		ChannelEvent::AuthRequired { message } => {
			format!("authentication required: {}", message.as_deref().unwrap_or("no details"))
		}
		ChannelEvent::ServerError { message, .. } => format!("server error: {message}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_no_flag_means_no_request() {
		assert_eq!(ownership_request(&ClaimArgs::default(), None), None);
	}

	#[test]
	fn test_master_claims_announce_intent() {
		let claim = ClaimArgs {
			force_master: true,
			..ClaimArgs::default()
		};
		let request = ownership_request(&claim, Some("tab-1".into())).unwrap();

		assert_eq!(request.kind(), "force_master");
		assert_eq!(request.claim().session_id.as_deref(), Some("tab-1"));
		assert_eq!(request.claim().is_master, Some(true));
	}

	#[test]
	fn test_take_ownership_does_not_claim_master() {
		let claim = ClaimArgs {
			take_ownership: true,
			..ClaimArgs::default()
		};
		let request = ownership_request(&claim, None).unwrap();

		assert_eq!(request.kind(), "take_ownership");
		assert_eq!(request.claim().is_master, None);
	}
}
