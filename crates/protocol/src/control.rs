//! Dev-bridge ownership protocol.
//!
//! Browser sessions negotiate which of them receives forwarded debug commands
//! ("active") and which holds authoritative control ("master"):
//!
//! 1. A session sends a [`ControlRequest`] (`take_ownership`, `claim_master`, ...)
//!    with its [`SessionClaim`] in the envelope's `data`
//! 2. The server answers each affected session with a [`ServerNotice`]
//!    (`ownership_granted`, `master_conflict`, `master_kicked`, ...)
//!
//! Both travel as regular [`Envelope`]s: the variant name is the `type` tag and
//! the variant fields are the `data` object.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::envelope::Envelope;

/// Session details a browser sends along with an ownership request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaim {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	/// Whether the sender believes it is (or wants to be) master.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_master: Option<bool>,
}

/// Ownership request sent by a browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlRequest {
	/// Become the active session; last caller wins.
	TakeOwnership(SessionClaim),
	/// Register session metadata and, when `isMaster` is set, claim master.
	RegisterMasterClient(SessionClaim),
	/// Become master unless another session already is.
	ClaimMaster(SessionClaim),
	/// Become master, evicting the current one.
	ForceMaster(SessionClaim),
	/// Ask the server to confirm the sender's belief about being master.
	CheckMasterStatus(SessionClaim),
}

impl ControlRequest {
	/// Type tags handled by [`ControlRequest`].
	pub const KINDS: [&'static str; 5] = [
		"take_ownership",
		"register_master_client",
		"claim_master",
		"force_master",
		"check_master_status",
	];

	/// Decodes a control request from an envelope.
	///
	/// Returns [`None`] when the envelope type is not a control type, and an error
	/// when it is but the payload does not match.
	pub fn from_envelope(envelope: &Envelope) -> Option<serde_json::Result<Self>> {
		if !Self::KINDS.contains(&envelope.kind.as_str()) {
			return None;
		}
		let data = match &envelope.data {
			Some(Value::Null) | None => json!({}),
			Some(data) => data.clone(),
		};
		Some(serde_json::from_value(json!({"type": envelope.kind, "data": data})))
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Self::TakeOwnership(_) => "take_ownership",
			Self::RegisterMasterClient(_) => "register_master_client",
			Self::ClaimMaster(_) => "claim_master",
			Self::ForceMaster(_) => "force_master",
			Self::CheckMasterStatus(_) => "check_master_status",
		}
	}

	pub fn claim(&self) -> &SessionClaim {
		match self {
			Self::TakeOwnership(claim)
			| Self::RegisterMasterClient(claim)
			| Self::ClaimMaster(claim)
			| Self::ForceMaster(claim)
			| Self::CheckMasterStatus(claim) => claim,
		}
	}

	pub fn into_envelope(self) -> Envelope {
		let data = serde_json::to_value(self.claim()).unwrap_or(Value::Null);
		Envelope::new(self.kind()).with_data(data)
	}
}

/// Public view of a connected session, used inside notices and client listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
	pub id: String,
	#[serde(default)]
	pub session_id: Option<String>,
	#[serde(default)]
	pub url: Option<String>,
	/// Connect time in milliseconds since the Unix epoch.
	pub connected_at: u64,
}

/// Notice the server sends to a session as the outcome of an ownership request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "type",
	content = "data",
	rename_all = "snake_case",
	rename_all_fields = "camelCase"
)]
pub enum ServerNotice {
	/// The receiver is now the active session.
	OwnershipGranted { client_id: String },
	/// The receiver is no longer active; `new_owner` took over.
	OwnershipReleased { new_owner: Option<String> },
	/// The receiver is now master.
	MasterGranted { client_id: String },
	/// The claim was refused because another session is master.
	MasterConflict { current_master: PeerSummary },
	/// The receiver was evicted as master by `new_master`.
	MasterKicked { new_master: PeerSummary },
	/// The receiver believes it is master but is not.
	MasterDenied { current_master: Option<PeerSummary> },
}

impl ServerNotice {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::OwnershipGranted { .. } => "ownership_granted",
			Self::OwnershipReleased { .. } => "ownership_released",
			Self::MasterGranted { .. } => "master_granted",
			Self::MasterConflict { .. } => "master_conflict",
			Self::MasterKicked { .. } => "master_kicked",
			Self::MasterDenied { .. } => "master_denied",
		}
	}

	pub fn into_envelope(self) -> Envelope {
		let kind = self.kind();
		let data = serde_json::to_value(&self)
			.ok()
			.and_then(|mut v| v.get_mut("data").map(Value::take))
			.unwrap_or(Value::Null);
		Envelope::new(kind).with_data(data)
	}

	/// Decodes a notice, returning [`None`] for envelopes of other types.
	pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
		serde_json::from_value(json!({"type": envelope.kind, "data": envelope.data_or_null()})).ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_control_request_reads_claim_from_data() {
		let env = Envelope::new("claim_master").with_data(json!({"sessionId": "s1", "url": "http://localhost/"}));
		let req = ControlRequest::from_envelope(&env).unwrap().unwrap();
		assert_eq!(req.kind(), "claim_master");
		assert_eq!(req.claim().session_id.as_deref(), Some("s1"));
	}

	#[test]
	fn test_control_request_without_data_uses_empty_claim() {
		let env = Envelope::new("take_ownership");
		let req = ControlRequest::from_envelope(&env).unwrap().unwrap();
		assert_eq!(req, ControlRequest::TakeOwnership(SessionClaim::default()));
	}

	#[test]
	fn test_non_control_envelope_is_not_decoded() {
		assert!(ControlRequest::from_envelope(&Envelope::new("console_log")).is_none());
	}

	#[test]
	fn test_notice_envelope_uses_camel_case_fields() {
		let notice = ServerNotice::MasterConflict {
			current_master: PeerSummary {
				id: "peer-1".into(),
				session_id: Some("s1".into()),
				url: None,
				connected_at: 10,
			},
		};
		let env = notice.clone().into_envelope();
		assert_eq!(env.kind, "master_conflict");
		let data = env.data.clone().unwrap();
		assert_eq!(data["currentMaster"]["sessionId"], "s1");
		assert_eq!(data["currentMaster"]["connectedAt"], 10);
		assert_eq!(ServerNotice::from_envelope(&env), Some(notice));
	}

	#[test]
	fn test_denied_notice_may_name_no_master() {
		let env = ServerNotice::MasterDenied { current_master: None }.into_envelope();
		assert!(env.data.unwrap()["currentMaster"].is_null());
	}
}
