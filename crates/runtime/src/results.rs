//! Results file sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use booker::{CoreError, Reporter, Result, RunSummary};
use parking_lot::Mutex;
use tracing::info;

/// Writes every summary to `booking_results_<YYYYmmdd_HHMMSS_mmm>.json`.
///
/// The timestamp is the run's finish time in UTC. Clones share the record of
/// the last file written.
#[derive(Debug, Clone)]
pub struct ResultsFileReporter {
	dir: PathBuf,
	written: Arc<Mutex<Option<PathBuf>>>,
}

impl ResultsFileReporter {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self {
			dir: dir.into(),
			written: Arc::default(),
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn file_for(&self, summary: &RunSummary) -> PathBuf {
		self.dir
			.join(format!("booking_results_{}.json", summary.finished_at.format("%Y%m%d_%H%M%S_%3f")))
	}

	/// Writes `summary` and returns the file path.
	pub async fn write(&self, summary: &RunSummary) -> Result<PathBuf> {
		tokio::fs::create_dir_all(&self.dir).await?;
		let path = self.file_for(summary);
		let json = serde_json::to_vec_pretty(summary)?;
		tokio::fs::write(&path, json)
			.await
			.map_err(|err| CoreError::Report(format!("cannot write {}: {err}", path.display())))?;
		info!(target = "booker.results", path = %path.display(), clients = summary.clients.len(), "results written");
		*self.written.lock() = Some(path.clone());
		Ok(path)
	}

	/// The file this reporter (or a clone) last wrote, if any.
	pub fn written(&self) -> Option<PathBuf> {
		self.written.lock().clone()
	}
}

#[async_trait]
impl Reporter for ResultsFileReporter {
	async fn report(&self, summary: &RunSummary) -> Result<()> {
		self.write(summary).await.map(|_| ())
	}
}

#[cfg(test)]
mod tests {
	use booker::{AttemptResult, ClientId, ClientReport, DispatchKind, OutcomeCounts};
	use chrono::{TimeZone, Utc};

	use super::*;

	fn summary() -> RunSummary {
		let results = [AttemptResult::Succeeded {
			confirmation_ref: "GNB123456".into(),
		}];
		RunSummary {
			started_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 59, 0).unwrap(),
			finished_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 41).unwrap() + chrono::Duration::milliseconds(250),
			elapsed_ms: 101_000,
			counts: OutcomeCounts::tally(&results),
			clients: vec![ClientReport {
				client_id: ClientId::new("ana@example.com"),
				name: "Ana Silva".into(),
				result: results[0].clone(),
				attempts: 1,
				dispatch: DispatchKind::Warm,
				warmup_failure: None,
				elapsed_ms: 4_200,
			}],
			load_warnings: Vec::new(),
		}
	}

	#[tokio::test]
	async fn writes_timestamped_json_into_a_fresh_directory() {
		let tmp = tempfile::tempdir().unwrap();
		let reporter = ResultsFileReporter::new(tmp.path().join("logs"));
		let summary = summary();

		let path = reporter.write(&summary).await.unwrap();

		assert_eq!(path.file_name().unwrap(), "booking_results_20260302_090041_250.json");
		assert_eq!(reporter.written(), Some(path.clone()));
		let written: RunSummary = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
		assert_eq!(written, summary);
	}

	#[tokio::test]
	async fn unwritable_directory_is_a_report_error() {
		let tmp = tempfile::tempdir().unwrap();
		let blocker = tmp.path().join("file");
		std::fs::write(&blocker, b"not a dir").unwrap();

		let reporter = ResultsFileReporter::new(&blocker);
		assert!(reporter.report(&summary()).await.is_err());
		assert_eq!(reporter.written(), None);
	}

	#[tokio::test]
	async fn stale_file_is_not_taken_for_this_run() {
		let tmp = tempfile::tempdir().unwrap();
		let reporter = ResultsFileReporter::new(tmp.path());
		let summary = summary();
		std::fs::write(reporter.file_for(&summary), b"{}").unwrap();

		assert_eq!(reporter.written(), None);
		let shared = reporter.clone();
		shared.report(&summary).await.unwrap();
		assert_eq!(reporter.written(), Some(reporter.file_for(&summary)));
	}
}
