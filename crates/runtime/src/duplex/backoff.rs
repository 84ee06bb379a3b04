use std::time::Duration;

/// Exponential reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	/// Delay before the first reconnect attempt.
	pub base_delay: Duration,
	/// Upper bound on any single delay.
	pub max_delay: Duration,
	/// Consecutive failed attempts after which the channel gives up.
	pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			max_attempts: 10,
		}
	}
}

/// Attempt counter over a [`ReconnectPolicy`].
///
/// Delays run `base, 2*base, 4*base, ...` clamped to `max_delay`; once
/// `max_attempts` delays have been handed out, [`next_delay`](Self::next_delay)
/// returns `None` until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct Backoff {
	policy: ReconnectPolicy,
	attempts: u32,
}

impl Backoff {
	pub fn new(policy: ReconnectPolicy) -> Self {
		Self { policy, attempts: 0 }
	}

	/// Counts one attempt and returns how long to wait before it.
	pub fn next_delay(&mut self) -> Option<Duration> {
		if self.attempts >= self.policy.max_attempts {
			return None;
		}
		let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
		let delay = self.policy.base_delay.saturating_mul(factor).min(self.policy.max_delay);
		self.attempts += 1;
		Some(delay)
	}

	/// Back to the base delay; called after every successful open.
	pub fn reset(&mut self) {
		self.attempts = 0;
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn is_exhausted(&self) -> bool {
		self.attempts >= self.policy.max_attempts
	}

	pub fn policy(&self) -> &ReconnectPolicy {
		&self.policy
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy(base_ms: u64, max_ms: u64, attempts: u32) -> ReconnectPolicy {
		ReconnectPolicy {
			base_delay: Duration::from_millis(base_ms),
			max_delay: Duration::from_millis(max_ms),
			max_attempts: attempts,
		}
	}

	#[test]
	fn test_delays_double_until_capped() {
		let mut backoff = Backoff::new(policy(100, 1_000, 8));
		let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
			.map(|d| d.as_millis() as u64)
			.collect();
		assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000, 1_000, 1_000]);
	}

	#[test]
	fn test_delays_are_monotonic_and_never_exceed_cap() {
		let mut backoff = Backoff::new(policy(1_000, 30_000, 64));
		let mut previous = Duration::ZERO;
		while let Some(delay) = backoff.next_delay() {
			assert!(delay >= previous);
			assert!(delay <= Duration::from_secs(30));
			previous = delay;
		}
		assert_eq!(backoff.attempts(), 64);
	}

	#[test]
	fn test_exhaustion_after_max_attempts() {
		let mut backoff = Backoff::new(policy(10, 100, 3));
		assert!(backoff.next_delay().is_some());
		assert!(backoff.next_delay().is_some());
		assert!(backoff.next_delay().is_some());
		assert!(backoff.is_exhausted());
		assert_eq!(backoff.next_delay(), None);
	}

	#[test]
	fn test_reset_returns_to_base() {
		let mut backoff = Backoff::new(policy(50, 10_000, 10));
		backoff.next_delay();
		backoff.next_delay();
		backoff.next_delay();
		backoff.reset();
		assert_eq!(backoff.attempts(), 0);
		assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
	}

	#[test]
	fn test_zero_attempts_never_reconnects() {
		let mut backoff = Backoff::new(policy(10, 100, 0));
		assert!(backoff.is_exhausted());
		assert_eq!(backoff.next_delay(), None);
	}
}
