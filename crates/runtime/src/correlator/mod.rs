//! Request/response correlation.
//!
//! Maps asynchronous request/response traffic onto futures:
//!
//! 1. Caller calls [`Correlator::issue`] with the request type and a timeout
//! 2. Correlator takes a fresh id from its [`IdSource`] and stores a oneshot sender
//! 3. Caller writes the request (carrying the id) to its transport and awaits the [`PendingReply`]
//! 4. The reader side calls [`Correlator::resolve`] / [`Correlator::reject`] when a reply arrives
//! 5. The reply future completes with the payload, or with [`Error::Timeout`] once the deadline passes
//!
//! Unknown or duplicate ids are a silent no-op. Dropping a [`PendingReply`]
//! before it completes removes its entry, so an abandoned call never leaks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

use crate::error::{Error, Result};

/// Source of correlation ids, unique for the lifetime of one correlator.
pub trait IdSource: Send + Sync + 'static {
	type Id: Clone + Eq + Hash + fmt::Display + Send + Sync + Unpin + 'static;

	fn next_id(&self) -> Self::Id;
}

/// Monotonic integer ids starting at 1.
#[derive(Debug, Default)]
pub struct SequentialIds {
	last: AtomicU64,
}

impl IdSource for SequentialIds {
	type Id = u64;

	fn next_id(&self) -> u64 {
		self.last.fetch_add(1, Ordering::SeqCst) + 1
	}
}

/// String tokens of the form `<prefix>-<epoch ms>-<counter>`.
///
/// The counter keeps tokens distinct within a process; the timestamp keeps
/// them distinct across restarts of the issuing side.
#[derive(Debug)]
pub struct TokenIds {
	prefix: String,
	counter: AtomicU64,
}

impl TokenIds {
	pub fn new(prefix: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			counter: AtomicU64::new(0),
		}
	}
}

impl Default for TokenIds {
	fn default() -> Self {
		Self::new("req")
	}
}

impl IdSource for TokenIds {
	type Id = String;

	fn next_id(&self) -> String {
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		format!("{}-{}-{}", self.prefix, bridgeline_protocol::now_millis(), n)
	}
}

struct PendingEntry {
	request_type: String,
	issued_at: Instant,
	tx: oneshot::Sender<Result<Value>>,
}

type PendingMap<K> = Arc<Mutex<HashMap<K, PendingEntry>>>;

/// In-flight request table.
///
/// One correlator belongs to one channel (or one connection); the map is only
/// reachable through these methods.
pub struct Correlator<S: IdSource> {
	ids: S,
	pending: PendingMap<S::Id>,
}

impl<S: IdSource> Correlator<S> {
	pub fn new(ids: S) -> Self {
		Self {
			ids,
			pending: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Registers a new in-flight request and returns the future awaiting its reply.
	pub fn issue(&self, request_type: &str, timeout: Duration) -> PendingReply<S::Id> {
		let id = self.ids.next_id();
		let (tx, rx) = oneshot::channel();
		let issued_at = Instant::now();

		self.pending.lock().insert(
			id.clone(),
			PendingEntry {
				request_type: request_type.to_string(),
				issued_at,
				tx,
			},
		);
		tracing::trace!(target = "bridgeline.correlator", %id, request_type, "issued");

		PendingReply {
			rx,
			deadline: issued_at + timeout,
			sleep: None,
			timeout,
			request_type: request_type.to_string(),
			guard: CancelGuard {
				id,
				pending: Arc::clone(&self.pending),
				completed: false,
			},
		}
	}

	/// Completes a pending request successfully. Returns false for unknown ids.
	pub fn resolve(&self, id: &S::Id, data: Value) -> bool {
		self.complete(id, Ok(data))
	}

	/// Completes a pending request with an error. Returns false for unknown ids.
	pub fn reject(&self, id: &S::Id, error: Error) -> bool {
		self.complete(id, Err(error))
	}

	/// Completes a pending request with `result`. Returns false for unknown ids.
	pub fn complete(&self, id: &S::Id, result: Result<Value>) -> bool {
		let Some(entry) = self.pending.lock().remove(id) else {
			return false;
		};
		tracing::trace!(
			target = "bridgeline.correlator",
			%id,
			request_type = %entry.request_type,
			elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
			"completed"
		);
		let _ = entry.tx.send(result);
		true
	}

	/// Rejects every pending request with [`Error::Disconnected`]. Returns how many were rejected.
	pub fn drain_all(&self, reason: &str) -> usize {
		let drained: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, entry)| entry).collect();
		let count = drained.len();
		for entry in drained {
			let _ = entry.tx.send(Err(Error::Disconnected(reason.to_string())));
		}
		if count > 0 {
			tracing::debug!(target = "bridgeline.correlator", count, reason, "drained pending requests");
		}
		count
	}

	/// Request type of a pending entry, if it is still in flight.
	pub fn request_type(&self, id: &S::Id) -> Option<String> {
		self.pending.lock().get(id).map(|entry| entry.request_type.clone())
	}

	pub fn contains(&self, id: &S::Id) -> bool {
		self.pending.lock().contains_key(id)
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}
}

impl<S: IdSource + Default> Default for Correlator<S> {
	fn default() -> Self {
		Self::new(S::default())
	}
}

/// RAII guard removing the pending entry when a reply future is dropped early.
struct CancelGuard<K: Eq + Hash> {
	id: K,
	pending: PendingMap<K>,
	completed: bool,
}

impl<K: Eq + Hash> CancelGuard<K> {
	fn complete(&mut self) {
		self.completed = true;
	}

	/// Removes the entry now; false if someone already completed it.
	fn take_entry(&mut self) -> bool {
		self.completed = true;
		self.pending.lock().remove(&self.id).is_some()
	}
}

impl<K: Eq + Hash> Drop for CancelGuard<K> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		self.pending.lock().remove(&self.id);
	}
}

/// Future returned by [`Correlator::issue`].
pub struct PendingReply<K: Eq + Hash> {
	rx: oneshot::Receiver<Result<Value>>,
	deadline: Instant,
	sleep: Option<Pin<Box<Sleep>>>,
	timeout: Duration,
	request_type: String,
	guard: CancelGuard<K>,
}

impl<K: Eq + Hash> PendingReply<K> {
	/// Correlation id to put on the outgoing request.
	pub fn id(&self) -> &K {
		&self.guard.id
	}

	pub fn request_type(&self) -> &str {
		&self.request_type
	}
}

impl<K: Eq + Hash + Unpin> Future for PendingReply<K> {
	type Output = Result<Value>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		if let Poll::Ready(result) = Pin::new(&mut this.rx).poll(cx) {
			this.guard.complete();
			return Poll::Ready(result.unwrap_or_else(|_| Err(Error::Disconnected("correlator dropped".to_string()))));
		}

		let deadline = this.deadline;
		let sleep = this.sleep.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
		if sleep.as_mut().poll(cx).is_pending() {
			return Poll::Pending;
		}

		if this.guard.take_entry() {
			return Poll::Ready(Err(Error::Timeout {
				request_type: this.request_type.clone(),
				after: this.timeout,
			}));
		}

		// Completed between the two polls above.
		match this.rx.try_recv() {
			Ok(result) => Poll::Ready(result),
			Err(_) => Poll::Ready(Err(Error::Timeout {
				request_type: this.request_type.clone(),
				after: this.timeout,
			})),
		}
	}
}

#[cfg(test)]
mod tests;
