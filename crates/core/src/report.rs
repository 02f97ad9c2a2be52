//! Outcome reporting sinks.

use async_trait::async_trait;
use booker_protocol::RunSummary;

use crate::error::Result;

/// Receives the summary once a run reaches `Done`.
///
/// Reporter failures are the caller's to log; they never change outcomes.
#[async_trait]
pub trait Reporter: Send + Sync {
	async fn report(&self, summary: &RunSummary) -> Result<()>;
}

/// Fans one summary out to several reporters, in order.
///
/// Every reporter is called even if an earlier one fails; the first error is
/// returned.
#[derive(Default)]
pub struct ReporterSet {
	reporters: Vec<Box<dyn Reporter>>,
}

impl ReporterSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
		self.reporters.push(Box::new(reporter));
		self
	}

	pub fn push(&mut self, reporter: Box<dyn Reporter>) {
		self.reporters.push(reporter);
	}

	pub fn len(&self) -> usize {
		self.reporters.len()
	}

	pub fn is_empty(&self) -> bool {
		self.reporters.is_empty()
	}
}

#[async_trait]
impl Reporter for ReporterSet {
	async fn report(&self, summary: &RunSummary) -> Result<()> {
		let mut first_err = None;
		for reporter in &self.reporters {
			if let Err(err) = reporter.report(summary).await {
				tracing::warn!(target = "booker.report", error = %err, "reporter failed");
				first_err.get_or_insert(err);
			}
		}
		first_err.map_or(Ok(()), Err)
	}
}
