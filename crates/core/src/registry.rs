//! Connected browser sessions and the two ownership roles.
//!
//! The registry keeps one record per connected peer and two pointers:
//! `active` (receives forwarded commands) and `master` (authoritative
//! session). A peer's `is_active`/`is_master` flags are derived from those
//! pointers, so two active or two master peers cannot be represented.
//!
//! Every operation is synchronous and returns the [`Directed`] notices the
//! caller must deliver; the registry performs no I/O.

use std::collections::HashMap;

use bridgeline_protocol::{PeerSummary, ServerNotice, SessionClaim};
use serde::Serialize;

use crate::error::ArbiterError;

pub type PeerId = String;

/// Connection details recorded for a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
	pub address: Option<String>,
	pub user_agent: Option<String>,
	pub session_id: Option<String>,
	pub url: Option<String>,
}

/// Point-in-time copy of a peer, safe to hold while peers come and go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
	pub id: PeerId,
	#[serde(flatten)]
	pub metadata: PeerMetadata,
	pub connected_at: u64,
	pub is_active: bool,
	pub is_master: bool,
}

impl PeerSnapshot {
	pub fn summary(&self) -> PeerSummary {
		PeerSummary {
			id: self.id.clone(),
			session_id: self.metadata.session_id.clone(),
			url: self.metadata.url.clone(),
			connected_at: self.connected_at,
		}
	}
}

/// A notice addressed to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Directed {
	pub peer: PeerId,
	pub notice: ServerNotice,
}

impl Directed {
	fn new(peer: &str, notice: ServerNotice) -> Self {
		Self {
			peer: peer.to_string(),
			notice,
		}
	}
}

#[derive(Debug, Clone)]
struct PeerRecord {
	seq: u64,
	metadata: PeerMetadata,
	connected_at: u64,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
	peers: HashMap<PeerId, PeerRecord>,
	active: Option<PeerId>,
	master: Option<PeerId>,
	next_seq: u64,
}

impl ClientRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a newly connected peer. It starts neither active nor master.
	pub fn register(&mut self, metadata: PeerMetadata) -> PeerId {
		self.register_at(metadata, bridgeline_protocol::now_millis())
	}

	pub fn register_at(&mut self, metadata: PeerMetadata, connected_at: u64) -> PeerId {
		self.next_seq += 1;
		let id = format!("client-{}", self.next_seq);
		self.peers.insert(
			id.clone(),
			PeerRecord {
				seq: self.next_seq,
				metadata,
				connected_at,
			},
		);
		id
	}

	/// Records the session id and URL carried by a claim; absent fields are kept.
	pub fn update_session(&mut self, peer: &str, claim: &SessionClaim) -> Result<(), ArbiterError> {
		let record = self.record_mut(peer)?;
		if let Some(session_id) = &claim.session_id {
			record.metadata.session_id = Some(session_id.clone());
		}
		if let Some(url) = &claim.url {
			record.metadata.url = Some(url.clone());
		}
		Ok(())
	}

	/// Removes a peer, clearing whichever roles it held. No replacement is promoted.
	pub fn unregister(&mut self, peer: &str) -> Option<PeerSnapshot> {
		let snapshot = self.snapshot(peer)?;
		self.peers.remove(peer);
		if self.active.as_deref() == Some(peer) {
			self.active = None;
		}
		if self.master.as_deref() == Some(peer) {
			self.master = None;
		}
		Some(snapshot)
	}

	/// Makes `peer` active. Last caller wins; the previous owner is told it lost ownership.
	pub fn take_ownership(&mut self, peer: &str) -> Result<Vec<Directed>, ArbiterError> {
		self.record(peer)?;
		let mut notices = Vec::new();
		if let Some(previous) = self.active.replace(peer.to_string()) {
			if previous != peer {
				notices.push(Directed::new(
					&previous,
					ServerNotice::OwnershipReleased {
						new_owner: Some(peer.to_string()),
					},
				));
			}
		}
		notices.push(Directed::new(
			peer,
			ServerNotice::OwnershipGranted {
				client_id: peer.to_string(),
			},
		));
		Ok(notices)
	}

	/// Grants master unless another peer already holds it.
	pub fn claim_master(&mut self, peer: &str) -> Result<Vec<Directed>, ArbiterError> {
		self.record(peer)?;
		if let Some(current) = self.master.as_deref().filter(|current| *current != peer) {
			let current_master = self.summary(current)?;
			return Err(ArbiterError::Conflict { current_master });
		}
		Ok(self.grant_master(peer))
	}

	/// Grants master, evicting the current holder.
	pub fn force_master(&mut self, peer: &str) -> Result<Vec<Directed>, ArbiterError> {
		let successor = self.summary(peer)?;
		let mut notices = Vec::new();
		if let Some(previous) = self.master.take() {
			if previous != peer {
				notices.push(Directed::new(&previous, ServerNotice::MasterKicked { new_master: successor }));
			}
		}
		notices.extend(self.grant_master(peer));
		Ok(notices)
	}

	/// Tells a peer that wrongly believes it is master who the master really is.
	pub fn check_master_status(&self, peer: &str, claims_master: bool) -> Result<Vec<Directed>, ArbiterError> {
		self.record(peer)?;
		if !claims_master || self.master.as_deref() == Some(peer) {
			return Ok(Vec::new());
		}
		let current_master = self.master.as_deref().map(|id| self.summary(id)).transpose()?;
		Ok(vec![Directed::new(peer, ServerNotice::MasterDenied { current_master })])
	}

	/// Records session metadata and claims master when the peer asks for it.
	pub fn register_master_client(&mut self, peer: &str, claim: &SessionClaim) -> Result<Vec<Directed>, ArbiterError> {
		self.update_session(peer, claim)?;
		if claim.is_master.unwrap_or(false) {
			self.claim_master(peer)
		} else {
			Ok(Vec::new())
		}
	}

	/// Snapshots of all peers in connection order.
	pub fn clients(&self) -> Vec<PeerSnapshot> {
		let mut records: Vec<(&PeerId, &PeerRecord)> = self.peers.iter().collect();
		records.sort_by_key(|(_, record)| record.seq);
		records.into_iter().map(|(id, record)| self.to_snapshot(id, record)).collect()
	}

	pub fn snapshot(&self, peer: &str) -> Option<PeerSnapshot> {
		self.peers.get_key_value(peer).map(|(id, record)| self.to_snapshot(id, record))
	}

	pub fn active(&self) -> Option<PeerSnapshot> {
		self.active.as_deref().and_then(|id| self.snapshot(id))
	}

	pub fn master(&self) -> Option<PeerSnapshot> {
		self.master.as_deref().and_then(|id| self.snapshot(id))
	}

	pub fn active_id(&self) -> Option<&str> {
		self.active.as_deref()
	}

	pub fn master_id(&self) -> Option<&str> {
		self.master.as_deref()
	}

	pub fn contains(&self, peer: &str) -> bool {
		self.peers.contains_key(peer)
	}

	pub fn len(&self) -> usize {
		self.peers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.peers.is_empty()
	}

	fn grant_master(&mut self, peer: &str) -> Vec<Directed> {
		self.master = Some(peer.to_string());
		let mut notices = vec![Directed::new(
			peer,
			ServerNotice::MasterGranted {
				client_id: peer.to_string(),
			},
		)];
		if self.active.is_none() {
			self.active = Some(peer.to_string());
			notices.push(Directed::new(
				peer,
				ServerNotice::OwnershipGranted {
					client_id: peer.to_string(),
				},
			));
		}
		notices
	}

	fn to_snapshot(&self, id: &str, record: &PeerRecord) -> PeerSnapshot {
		PeerSnapshot {
			id: id.to_string(),
			metadata: record.metadata.clone(),
			connected_at: record.connected_at,
			is_active: self.active.as_deref() == Some(id),
			is_master: self.master.as_deref() == Some(id),
		}
	}

	fn summary(&self, peer: &str) -> Result<PeerSummary, ArbiterError> {
		self.snapshot(peer)
			.map(|snapshot| snapshot.summary())
			.ok_or_else(|| ArbiterError::UnknownPeer(peer.to_string()))
	}

	fn record(&self, peer: &str) -> Result<&PeerRecord, ArbiterError> {
		self.peers.get(peer).ok_or_else(|| ArbiterError::UnknownPeer(peer.to_string()))
	}

	fn record_mut(&mut self, peer: &str) -> Result<&mut PeerRecord, ArbiterError> {
		self.peers.get_mut(peer).ok_or_else(|| ArbiterError::UnknownPeer(peer.to_string()))
	}
}
