#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use booker::plan::{RetryConfig, RunPlanBuilder};
use booker::queue::{RawRecord, VecSource};
use booker::sim::{SimDriver, SimPortal};
use booker::{ClientQueue, ConcurrencyScheduler, RunPlan};

pub struct Rig {
	pub driver: Arc<SimDriver>,
	pub portal: Arc<SimPortal>,
}

impl Rig {
	pub fn new(portal: SimPortal) -> Self {
		Self {
			driver: Arc::new(SimDriver::new()),
			portal: Arc::new(portal),
		}
	}

	pub fn scheduler(&self, plan: RunPlan, ids: &[&str]) -> ConcurrencyScheduler {
		ConcurrencyScheduler::new(plan, queue(ids), self.driver.clone(), self.portal.clone())
	}

	/// Waits for background closes scheduled by dropped sessions.
	pub async fn assert_all_closed(&self) {
		for _ in 0..200 {
			if self.driver.open_handles() == 0 {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("{} browser handles left open", self.driver.open_handles());
	}
}

pub fn record(n: usize, id: &str) -> RawRecord {
	RawRecord::new(n)
		.with("id", id)
		.with("first_name", "Client")
		.with("last_name", id)
		.with("email", &format!("{id}@example.com"))
		.with("passport_number", &format!("P{n:05}"))
		.with("visa_type", "Tourism")
		.with("application_center", "Lisbon")
}

pub fn queue(ids: &[&str]) -> ClientQueue {
	let records = ids.iter().enumerate().map(|(n, id)| record(n + 1, id)).collect();
	ClientQueue::load(&VecSource::new(records), ids.len().max(1)).expect("in-memory source loads")
}

/// Plan with fast, deterministic retries.
pub fn plan() -> RunPlanBuilder {
	RunPlan::builder()
		.retry(RetryConfig {
			max_attempts: 3,
			base_delay: Duration::from_millis(10),
			max_delay: Duration::from_millis(40),
			jitter: 0.0,
			seed: Some(42),
		})
		.attempt_timeout(Duration::from_secs(5))
		.warmup_timeout(Duration::from_secs(5))
		.cancel_grace(Duration::from_millis(50))
}

pub fn ms(n: u64) -> Duration {
	Duration::from_millis(n)
}
