//! Per-client reports and the run summary handed to reporters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ClientId;
use crate::outcome::{AttemptResult, FailureReason};

/// How a client's first attempt got its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
	/// Pre-warmed session handed over from the warmer.
	Warm,
	/// Fresh session; warmup was disabled or skipped.
	Cold,
	/// Fresh session because warmup failed or did not finish in time.
	ColdAtRisk,
	/// Never dispatched (cancelled, cut off, or refused).
	NotDispatched,
}

/// Final record for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientReport {
	pub client_id: ClientId,
	pub name: String,
	pub result: AttemptResult,
	pub attempts: u32,
	pub dispatch: DispatchKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub warmup_failure: Option<FailureReason>,
	pub elapsed_ms: u64,
}

impl ClientReport {
	/// `true` when warmup did not produce a session for this client.
	pub fn at_risk(&self) -> bool {
		self.dispatch == DispatchKind::ColdAtRisk
	}
}

/// Counts by terminal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
	pub succeeded: usize,
	pub failed_terminal: usize,
	pub abandoned: usize,
}

impl OutcomeCounts {
	pub fn tally<'a>(results: impl IntoIterator<Item = &'a AttemptResult>) -> Self {
		let mut counts = Self::default();
		for result in results {
			match result {
				AttemptResult::Succeeded { .. } => counts.succeeded += 1,
				AttemptResult::FailedTerminal { .. } => counts.failed_terminal += 1,
				AttemptResult::Abandoned { .. } => counts.abandoned += 1,
				// Never final; reports only ever carry terminal results.
				AttemptResult::FailedRetryable { .. } => {}
			}
		}
		counts
	}

	pub fn total(&self) -> usize {
		self.succeeded + self.failed_terminal + self.abandoned
	}
}

/// Summary of a run, one entry per client in queue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub elapsed_ms: u64,
	pub counts: OutcomeCounts,
	pub clients: Vec<ClientReport>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub load_warnings: Vec<String>,
}

impl RunSummary {
	pub fn client(&self, id: &ClientId) -> Option<&ClientReport> {
		self.clients.iter().find(|report| &report.client_id == id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::outcome::{AbandonReason, TerminalReason};

	#[test]
	fn tally_counts_terminal_results() {
		let results = [
			AttemptResult::Succeeded {
				confirmation_ref: "A1".into(),
			},
			AttemptResult::Succeeded {
				confirmation_ref: "A2".into(),
			},
			AttemptResult::FailedTerminal {
				reason: TerminalReason::NoSlots,
			},
			AttemptResult::abandoned(AbandonReason::Cancelled),
		];
		let counts = OutcomeCounts::tally(&results);
		assert_eq!(counts.succeeded, 2);
		assert_eq!(counts.failed_terminal, 1);
		assert_eq!(counts.abandoned, 1);
		assert_eq!(counts.total(), 4);
	}
}
