//! Run configuration.
//!
//! A [`RunPlan`] is built once per run through [`RunPlanBuilder`] and is
//! immutable afterwards. [`RunPlanBuilder::build`] is the only place plan
//! values are checked; everything downstream trusts them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_MAX_CLIENTS: usize = 5;
pub const DEFAULT_PARALLELISM: usize = 5;
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(4 * 60);
pub const DEFAULT_WARMUP_LEAD: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_WARMUP_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// How many attempts may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "limit")]
pub enum ConcurrencyMode {
	/// One client at a time, each run to a terminal result (retries included)
	/// before the next starts.
	Sequential,
	/// Up to `N` attempts in flight.
	ParallelBounded(usize),
}

impl ConcurrencyMode {
	/// Number of permits backing this mode.
	pub fn cap(&self) -> usize {
		match self {
			ConcurrencyMode::Sequential => 1,
			ConcurrencyMode::ParallelBounded(n) => *n,
		}
	}

	pub fn is_sequential(&self) -> bool {
		matches!(self, ConcurrencyMode::Sequential)
	}
}

impl fmt::Display for ConcurrencyMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConcurrencyMode::Sequential => write!(f, "sequential"),
			ConcurrencyMode::ParallelBounded(n) => write!(f, "parallel-bounded({n})"),
		}
	}
}

/// What happens to a client whose warmup did not produce a session by the
/// time the window opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdDispatchPolicy {
	/// Dispatch on a fresh session and flag the client at-risk.
	#[default]
	Allow,
	/// End the client with `FailedTerminal{WarmupFailed}`.
	Refuse,
}

/// Retry bounds and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
	/// Total attempts per client, the first one included.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	/// Extra random delay as a fraction of the computed backoff, in `[0, 1]`.
	pub jitter: f64,
	/// Fixed RNG seed for reproducible jitter.
	pub seed: Option<u64>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_secs(2),
			max_delay: Duration::from_secs(30),
			jitter: 0.5,
			seed: None,
		}
	}
}

/// Immutable configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
	/// Instant the booking window opens. `None` means dispatch as soon as
	/// warmup (if any) settles.
	pub target: Option<DateTime<Utc>>,
	pub warmup: bool,
	/// How long before `target` warming starts.
	pub warmup_lead: Duration,
	/// Bound on a single warm call, and on the whole warm phase when there is
	/// no target.
	pub warmup_timeout: Duration,
	pub heartbeat_interval: Duration,
	pub attempt_timeout: Duration,
	pub cancel_grace: Duration,
	/// Retries stop this long after the window opens.
	pub retry_budget: Duration,
	pub mode: ConcurrencyMode,
	pub max_clients: usize,
	pub headless: bool,
	pub cold_dispatch: ColdDispatchPolicy,
	pub retry: RetryConfig,
}

impl RunPlan {
	pub fn builder() -> RunPlanBuilder {
		RunPlanBuilder::default()
	}

	/// Instant warming should start, if warmup is on and a target is set.
	pub fn warm_start(&self) -> Option<DateTime<Utc>> {
		let lead = chrono::TimeDelta::from_std(self.warmup_lead).ok()?;
		self.target.filter(|_| self.warmup).map(|target| target - lead)
	}

	/// The instant the window is treated as open: the target when it is still
	/// ahead of `now`, otherwise `now`.
	pub fn window_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
		match self.target {
			Some(target) if target > now => target,
			_ => now,
		}
	}

	/// Wall-clock cutoff for retries for a window opening at `window_open`.
	pub fn cutoff(&self, window_open: DateTime<Utc>) -> DateTime<Utc> {
		chrono::TimeDelta::from_std(self.retry_budget)
			.ok()
			.and_then(|budget| window_open.checked_add_signed(budget))
			.unwrap_or(DateTime::<Utc>::MAX_UTC)
	}
}

/// Builder for [`RunPlan`]. Unset knobs take the defaults.
#[derive(Debug, Clone)]
pub struct RunPlanBuilder {
	plan: RunPlan,
}

impl Default for RunPlanBuilder {
	fn default() -> Self {
		Self {
			plan: RunPlan {
				target: None,
				warmup: false,
				warmup_lead: DEFAULT_WARMUP_LEAD,
				warmup_timeout: DEFAULT_WARMUP_TIMEOUT,
				heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
				attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
				cancel_grace: DEFAULT_CANCEL_GRACE,
				retry_budget: DEFAULT_RETRY_BUDGET,
				mode: ConcurrencyMode::ParallelBounded(DEFAULT_PARALLELISM),
				max_clients: DEFAULT_MAX_CLIENTS,
				headless: true,
				cold_dispatch: ColdDispatchPolicy::Allow,
				retry: RetryConfig::default(),
			},
		}
	}
}

impl RunPlanBuilder {
	pub fn target(mut self, target: Option<DateTime<Utc>>) -> Self {
		self.plan.target = target;
		self
	}

	pub fn warmup(mut self, enabled: bool) -> Self {
		self.plan.warmup = enabled;
		self
	}

	pub fn warmup_lead(mut self, lead: Duration) -> Self {
		self.plan.warmup_lead = lead;
		self
	}

	pub fn warmup_timeout(mut self, timeout: Duration) -> Self {
		self.plan.warmup_timeout = timeout;
		self
	}

	pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
		self.plan.heartbeat_interval = interval;
		self
	}

	pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
		self.plan.attempt_timeout = timeout;
		self
	}

	pub fn cancel_grace(mut self, grace: Duration) -> Self {
		self.plan.cancel_grace = grace;
		self
	}

	pub fn retry_budget(mut self, budget: Duration) -> Self {
		self.plan.retry_budget = budget;
		self
	}

	pub fn mode(mut self, mode: ConcurrencyMode) -> Self {
		self.plan.mode = mode;
		self
	}

	pub fn max_clients(mut self, max: usize) -> Self {
		self.plan.max_clients = max;
		self
	}

	pub fn headless(mut self, headless: bool) -> Self {
		self.plan.headless = headless;
		self
	}

	pub fn cold_dispatch(mut self, policy: ColdDispatchPolicy) -> Self {
		self.plan.cold_dispatch = policy;
		self
	}

	pub fn retry(mut self, retry: RetryConfig) -> Self {
		self.plan.retry = retry;
		self
	}

	pub fn max_attempts(mut self, attempts: u32) -> Self {
		self.plan.retry.max_attempts = attempts;
		self
	}

	pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
		self.plan.retry.base_delay = base;
		self.plan.retry.max_delay = max;
		self
	}

	pub fn jitter(mut self, jitter: f64) -> Self {
		self.plan.retry.jitter = jitter;
		self
	}

	pub fn seed(mut self, seed: u64) -> Self {
		self.plan.retry.seed = Some(seed);
		self
	}

	/// Validates and returns the plan.
	pub fn build(self) -> Result<RunPlan> {
		let plan = self.plan;
		let invalid = |msg: &str| Err(CoreError::InvalidPlan(msg.to_string()));

		if plan.mode.cap() == 0 {
			return invalid("concurrency limit must be at least 1");
		}
		if plan.max_clients == 0 {
			return invalid("max clients must be at least 1");
		}
		if plan.retry.max_attempts == 0 {
			return invalid("max attempts must be at least 1");
		}
		if plan.heartbeat_interval.is_zero() {
			return invalid("heartbeat interval must be non-zero");
		}
		if plan.attempt_timeout.is_zero() || plan.warmup_timeout.is_zero() {
			return invalid("attempt and warmup timeouts must be non-zero");
		}
		if !(0.0..=1.0).contains(&plan.retry.jitter) {
			return invalid("jitter must be within [0, 1]");
		}
		if plan.retry.base_delay > plan.retry.max_delay {
			return invalid("base delay exceeds max delay");
		}
		Ok(plan)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_validate() {
		let plan = RunPlan::builder().build().unwrap();
		assert_eq!(plan.retry_budget, Duration::from_secs(240));
		assert_eq!(plan.mode.cap(), DEFAULT_PARALLELISM);
		assert_eq!(plan.cold_dispatch, ColdDispatchPolicy::Allow);
		assert_eq!(plan.retry.max_attempts, 3);
	}

	#[test]
	fn rejects_zero_concurrency_and_attempts() {
		assert!(matches!(
			RunPlan::builder().mode(ConcurrencyMode::ParallelBounded(0)).build(),
			Err(CoreError::InvalidPlan(_))
		));
		assert!(RunPlan::builder().max_attempts(0).build().is_err());
		assert!(RunPlan::builder().heartbeat_interval(Duration::ZERO).build().is_err());
		assert!(RunPlan::builder().jitter(1.5).build().is_err());
		assert!(RunPlan::builder().jitter(f64::NAN).build().is_err());
		assert!(RunPlan::builder().backoff(Duration::from_secs(10), Duration::from_secs(1)).build().is_err());
	}

	#[test]
	fn sequential_has_cap_one() {
		assert_eq!(ConcurrencyMode::Sequential.cap(), 1);
		assert!(ConcurrencyMode::Sequential.is_sequential());
		assert_eq!(ConcurrencyMode::ParallelBounded(3).to_string(), "parallel-bounded(3)");
	}

	#[test]
	fn window_open_clamps_past_target_to_now() {
		let now = Utc::now();
		let past = RunPlan::builder().target(Some(now - chrono::TimeDelta::minutes(1))).build().unwrap();
		assert_eq!(past.window_open(now), now);

		let future_target = now + chrono::TimeDelta::minutes(10);
		let future = RunPlan::builder().target(Some(future_target)).build().unwrap();
		assert_eq!(future.window_open(now), future_target);
		assert_eq!(future.cutoff(future_target), future_target + chrono::TimeDelta::minutes(4));
	}

	#[test]
	fn warm_start_requires_warmup_and_target() {
		let target = Utc::now() + chrono::TimeDelta::minutes(10);
		let off = RunPlan::builder().target(Some(target)).build().unwrap();
		assert_eq!(off.warm_start(), None);

		let on = RunPlan::builder().target(Some(target)).warmup(true).build().unwrap();
		assert_eq!(on.warm_start(), Some(target - chrono::TimeDelta::minutes(3)));
	}
}
