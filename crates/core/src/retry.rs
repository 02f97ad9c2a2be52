//! Retry decisions with capped exponential backoff.
//!
//! The decision is a total function of the failure reason, the attempt count
//! and the wall clock:
//!
//! 1. terminal reasons are never retried ([`RetryDecision::Stop`])
//! 2. once `max_attempts` attempts have run the client is abandoned with
//!    `MaxRetriesExceeded`
//! 3. a retry that would start at or after the cutoff is abandoned with
//!    `DeadlineExceeded`
//!
//! Delay for the n-th retry is `min(max_delay, base_delay * 2^(n-1))` plus a
//! uniform random extra of up to `jitter` times that delay.

use std::sync::Arc;
use std::time::Duration;

use booker_protocol::{AbandonReason, FailureReason};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::{SharedClock, SystemClock};
use crate::plan::RetryConfig;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
	/// Try again once `after` has elapsed.
	Retry { after: Duration },
	/// Give up on the client.
	Abandon { reason: AbandonReason },
	/// The failure is final; keep it as the client's result.
	Stop,
}

/// Retry policy shared by the scheduler and the warmer.
#[derive(Clone)]
pub struct RetryPolicy {
	config: RetryConfig,
	cutoff: Option<DateTime<Utc>>,
	clock: SharedClock,
	rng: Arc<Mutex<StdRng>>,
}

impl std::fmt::Debug for RetryPolicy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RetryPolicy")
			.field("config", &self.config)
			.field("cutoff", &self.cutoff)
			.finish_non_exhaustive()
	}
}

impl RetryPolicy {
	pub fn new(config: RetryConfig) -> Self {
		Self::with_clock(config, Arc::new(SystemClock))
	}

	pub fn with_clock(config: RetryConfig, clock: SharedClock) -> Self {
		let rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_os_rng(),
		};
		Self {
			config,
			cutoff: None,
			clock,
			rng: Arc::new(Mutex::new(rng)),
		}
	}

	/// Copy of this policy bounded by `cutoff`. The jitter source is shared.
	pub fn with_cutoff(&self, cutoff: DateTime<Utc>) -> Self {
		Self {
			cutoff: Some(cutoff),
			..self.clone()
		}
	}

	pub fn cutoff(&self) -> Option<DateTime<Utc>> {
		self.cutoff
	}

	pub fn max_attempts(&self) -> u32 {
		self.config.max_attempts
	}

	/// Backoff before the `retry`-th retry (1-based), without jitter.
	pub fn backoff(&self, retry: u32) -> Duration {
		let exp = retry.saturating_sub(1).min(31);
		let factor = 1u32 << exp;
		self.config.base_delay.saturating_mul(factor).min(self.config.max_delay)
	}

	fn jittered(&self, delay: Duration) -> Duration {
		if self.config.jitter <= 0.0 || delay.is_zero() {
			return delay;
		}
		let spread = delay.as_secs_f64() * self.config.jitter;
		let extra = self.rng.lock().random_range(0.0..=spread);
		delay + Duration::from_secs_f64(extra)
	}

	/// Decides what happens after `attempts_so_far` attempts, the last of
	/// which failed with `reason`.
	pub fn should_retry(&self, attempts_so_far: u32, reason: &FailureReason) -> RetryDecision {
		match reason {
			FailureReason::Terminal(_) => return RetryDecision::Stop,
			FailureReason::Retryable(_) => {}
		}
		if attempts_so_far >= self.config.max_attempts {
			return RetryDecision::Abandon {
				reason: AbandonReason::MaxRetriesExceeded,
			};
		}
		let after = self.jittered(self.backoff(attempts_so_far));
		if let Some(cutoff) = self.cutoff {
			let starts_at = chrono::TimeDelta::from_std(after)
				.ok()
				.and_then(|delay| self.clock.now().checked_add_signed(delay));
			if starts_at.is_none_or(|start| start >= cutoff) {
				return RetryDecision::Abandon {
					reason: AbandonReason::DeadlineExceeded,
				};
			}
		}
		RetryDecision::Retry { after }
	}
}

#[cfg(test)]
mod tests {
	use booker_protocol::{RetryableReason, TerminalReason};

	use super::*;

	fn config(max_attempts: u32, jitter: f64) -> RetryConfig {
		RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(1_000),
			jitter,
			seed: Some(7),
		}
	}

	const TIMEOUT: FailureReason = FailureReason::Retryable(RetryableReason::Timeout);

	#[test]
	fn terminal_reasons_always_stop() {
		let policy = RetryPolicy::new(config(5, 0.0));
		for reason in [TerminalReason::NoSlots, TerminalReason::AuthRejected, TerminalReason::ChallengeUnsolvable] {
			assert_eq!(policy.should_retry(1, &reason.into()), RetryDecision::Stop);
		}
	}

	#[test]
	fn retries_until_max_attempts() {
		let policy = RetryPolicy::new(config(3, 0.0));
		assert!(matches!(policy.should_retry(1, &TIMEOUT), RetryDecision::Retry { .. }));
		assert!(matches!(policy.should_retry(2, &TIMEOUT), RetryDecision::Retry { .. }));
		assert_eq!(
			policy.should_retry(3, &TIMEOUT),
			RetryDecision::Abandon {
				reason: AbandonReason::MaxRetriesExceeded
			}
		);
	}

	#[test]
	fn single_attempt_plan_never_retries() {
		let policy = RetryPolicy::new(config(1, 0.0));
		assert_eq!(
			policy.should_retry(1, &RetryableReason::Network.into()),
			RetryDecision::Abandon {
				reason: AbandonReason::MaxRetriesExceeded
			}
		);
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = RetryPolicy::new(config(10, 0.0));
		assert_eq!(policy.backoff(1), Duration::from_millis(100));
		assert_eq!(policy.backoff(2), Duration::from_millis(200));
		assert_eq!(policy.backoff(4), Duration::from_millis(800));
		assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
		assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
	}

	#[test]
	fn jitter_stays_within_ratio() {
		let policy = RetryPolicy::new(config(10, 0.5));
		for _ in 0..50 {
			let RetryDecision::Retry { after } = policy.should_retry(2, &TIMEOUT) else {
				panic!("expected retry");
			};
			assert!(after >= Duration::from_millis(200));
			assert!(after <= Duration::from_millis(300));
		}
	}

	#[test]
	fn retry_past_cutoff_is_abandoned() {
		let policy = RetryPolicy::new(config(10, 0.0)).with_cutoff(Utc::now() + chrono::TimeDelta::milliseconds(50));
		assert_eq!(
			policy.should_retry(1, &TIMEOUT),
			RetryDecision::Abandon {
				reason: AbandonReason::DeadlineExceeded
			}
		);

		let roomy = RetryPolicy::new(config(10, 0.0)).with_cutoff(Utc::now() + chrono::TimeDelta::minutes(5));
		assert!(matches!(roomy.should_retry(1, &TIMEOUT), RetryDecision::Retry { .. }));
	}

	#[test]
	fn max_attempts_checked_before_cutoff() {
		let policy = RetryPolicy::new(config(2, 0.0)).with_cutoff(Utc::now() - chrono::TimeDelta::minutes(1));
		assert_eq!(
			policy.should_retry(2, &TIMEOUT),
			RetryDecision::Abandon {
				reason: AbandonReason::MaxRetriesExceeded
			}
		);
	}
}
