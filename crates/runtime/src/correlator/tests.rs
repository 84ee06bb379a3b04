use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;

#[test]
fn test_sequential_ids_start_at_one() {
	let ids = SequentialIds::default();
	assert_eq!(ids.next_id(), 1);
	assert_eq!(ids.next_id(), 2);
	assert_eq!(ids.next_id(), 3);
}

#[test]
fn test_token_ids_carry_prefix() {
	let ids = TokenIds::new("ping");
	let a = ids.next_id();
	let b = ids.next_id();
	assert!(a.starts_with("ping-"));
	assert_ne!(a, b);
}

#[tokio::test]
async fn test_concurrent_issue_yields_distinct_ids() {
	let correlator = Arc::new(Correlator::new(TokenIds::default()));
	let mut tasks = Vec::new();
	for _ in 0..16 {
		let correlator = Arc::clone(&correlator);
		tasks.push(tokio::spawn(async move {
			(0..64)
				.map(|_| correlator.issue("noop", Duration::from_secs(60)).id().clone())
				.collect::<Vec<_>>()
		}));
	}

	let mut seen = HashSet::new();
	for task in tasks {
		for id in task.await.unwrap() {
			assert!(seen.insert(id), "duplicate correlation id");
		}
	}
	assert_eq!(seen.len(), 16 * 64);
}

#[tokio::test]
async fn test_resolve_delivers_payload() {
	let correlator = Correlator::new(SequentialIds::default());
	let reply = correlator.issue("get_clients", Duration::from_secs(5));
	let id = *reply.id();

	assert!(correlator.resolve(&id, json!({"clients": []})));
	let value = reply.await.unwrap();
	assert_eq!(value, json!({"clients": []}));
	assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_second_resolve_is_noop() {
	let correlator = Correlator::new(SequentialIds::default());
	let reply = correlator.issue("get_logs", Duration::from_secs(5));
	let id = *reply.id();

	assert!(correlator.resolve(&id, json!(1)));
	assert!(!correlator.resolve(&id, json!(2)));
	assert!(!correlator.reject(&id, Error::Remote("late".into())));
	assert_eq!(reply.await.unwrap(), json!(1));
}

#[test]
fn test_unknown_id_is_noop() {
	let correlator = Correlator::new(SequentialIds::default());
	assert!(!correlator.resolve(&99, json!(null)));
	assert!(!correlator.reject(&99, Error::Remote("x".into())));
}

#[tokio::test]
async fn test_reject_surfaces_error() {
	let correlator = Correlator::new(SequentialIds::default());
	let reply = correlator.issue("screenshot", Duration::from_secs(5));
	let id = *reply.id();

	correlator.reject(&id, Error::Remote("no active tab".into()));
	let err = reply.await.unwrap_err();
	assert!(err.is_remote(), "expected remote error, got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_and_removes_entry() {
	let correlator = Correlator::new(SequentialIds::default());
	let reply = correlator.issue("get_logs", Duration::from_millis(250));
	let id = *reply.id();
	let started = Instant::now();

	let err = reply.await.unwrap_err();
	let elapsed = started.elapsed();

	match err {
		Error::Timeout { ref request_type, after } => {
			assert_eq!(request_type, "get_logs");
			assert_eq!(after, Duration::from_millis(250));
		}
		other => panic!("expected timeout, got {other:?}"),
	}
	assert!(elapsed >= Duration::from_millis(250));
	assert!(elapsed < Duration::from_millis(300));
	assert_eq!(correlator.pending_count(), 0);
	assert!(!correlator.resolve(&id, json!("too late")));
}

#[tokio::test]
async fn test_drain_all_rejects_every_pending_request() {
	let correlator = Correlator::new(SequentialIds::default());
	let replies: Vec<_> = (0..5).map(|_| correlator.issue("get_logs", Duration::from_secs(30))).collect();
	let ids: Vec<u64> = replies.iter().map(|r| *r.id()).collect();

	assert_eq!(correlator.drain_all("channel closed"), 5);

	for reply in replies {
		let err = reply.await.unwrap_err();
		assert!(err.is_disconnected(), "expected disconnected, got {err:?}");
	}
	for id in ids {
		assert!(!correlator.resolve(&id, json!("after close")));
	}
}

#[tokio::test]
async fn test_dropping_reply_cancels_entry() {
	let correlator = Correlator::new(SequentialIds::default());
	let reply = correlator.issue("execute", Duration::from_secs(30));
	let id = *reply.id();
	assert!(correlator.contains(&id));
	assert_eq!(correlator.request_type(&id).as_deref(), Some("execute"));

	drop(reply);
	assert!(!correlator.contains(&id));
	assert_eq!(correlator.pending_count(), 0);
}
