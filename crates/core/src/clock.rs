//! Wall-clock access and deadline waits.
//!
//! Waits against a wall-clock instant are done in short slices, re-reading
//! the clock after each one, so a suspended process or a stepped system clock
//! wakes up on time instead of oversleeping a single long timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Longest single sleep before the clock is consulted again.
pub const MAX_SLICE: Duration = Duration::from_millis(250);

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
	fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

pub type SharedClock = Arc<dyn Clock>;

/// How a deadline wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
	Reached,
	Cancelled,
}

impl fmt::Display for WaitOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WaitOutcome::Reached => write!(f, "reached"),
			WaitOutcome::Cancelled => write!(f, "cancelled"),
		}
	}
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(clock: &dyn Clock, deadline: DateTime<Utc>) -> Option<Duration> {
	(deadline - clock.now()).to_std().ok().filter(|left| !left.is_zero())
}

/// Sleeps until `deadline` on `clock`, returning early on cancellation.
pub async fn sleep_until(clock: &dyn Clock, deadline: DateTime<Utc>, cancel: &CancellationToken) -> WaitOutcome {
	loop {
		if cancel.is_cancelled() {
			return WaitOutcome::Cancelled;
		}
		let Some(left) = remaining(clock, deadline) else {
			return WaitOutcome::Reached;
		};
		tokio::select! {
			biased;
			_ = cancel.cancelled() => return WaitOutcome::Cancelled,
			_ = tokio::time::sleep(left.min(MAX_SLICE)) => {}
		}
	}
}
