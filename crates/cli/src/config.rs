//! Run configuration.
//!
//! Settings come from an optional JSON file (camelCase keys) and are then
//! overridden by command-line flags. [`Settings::plan`] turns the merged
//! result into a validated [`RunPlan`].
//!
//! ```json
//! {
//!   "csv": "clients.csv",
//!   "targetTime": "2026-03-02 09:00",
//!   "warmup": true,
//!   "parallelism": 3,
//!   "flow": "portal.json",
//!   "retry": { "maxAttempts": 4, "baseDelayMs": 1500 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use booker::plan::{self, ColdDispatchPolicy, ConcurrencyMode, RunPlan};
use booker_runtime::rpc::DEFAULT_ENDPOINT;
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::{CheckArgs, RunArgs};
use crate::error::{CliError, Result};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "booker.json";
pub const DEFAULT_CSV: &str = "clients.csv";
pub const DEFAULT_RESULTS_DIR: &str = "logs";
const DEFAULT_DRIVER_TIMEOUT_SECS: u64 = 60;

/// Retry knobs as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetrySettings {
	pub max_attempts: Option<u32>,
	pub base_delay_ms: Option<u64>,
	pub max_delay_ms: Option<u64>,
	pub jitter: Option<f64>,
	pub seed: Option<u64>,
}

/// Everything a run can be configured with. Unset fields use the engine
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
	pub csv: Option<PathBuf>,
	pub target_time: Option<String>,
	pub warmup: Option<bool>,
	pub headless: Option<bool>,
	pub sequential: Option<bool>,
	pub parallelism: Option<usize>,
	pub max_clients: Option<usize>,
	pub driver: Option<String>,
	pub driver_timeout_secs: Option<u64>,
	pub flow: Option<PathBuf>,
	pub results_dir: Option<PathBuf>,
	pub warmup_lead_secs: Option<u64>,
	pub warmup_timeout_secs: Option<u64>,
	pub heartbeat_secs: Option<u64>,
	pub attempt_timeout_secs: Option<u64>,
	pub cancel_grace_secs: Option<u64>,
	pub retry_budget_secs: Option<u64>,
	pub cold_dispatch: Option<ColdDispatchPolicy>,
	#[serde(default)]
	pub retry: RetrySettings,
}

impl Settings {
	/// Reads `path`, or `./booker.json` when no path is given and it exists.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => {
				let default = PathBuf::from(DEFAULT_CONFIG_FILE);
				if !default.is_file() {
					return Ok(Self::default());
				}
				default
			}
		};
		let text = std::fs::read_to_string(&path).map_err(|source| CliError::ConfigRead { path: path.clone(), source })?;
		let settings: Self = serde_json::from_str(&text).map_err(|source| CliError::ConfigParse { path: path.clone(), source })?;
		debug!(target = "booker.config", path = %path.display(), "config loaded");
		Ok(settings)
	}

	/// Applies `booker run` flags on top of the file settings.
	pub fn merge_run(mut self, args: &RunArgs) -> Self {
		override_with(&mut self.csv, args.csv.clone());
		override_with(&mut self.target_time, args.target_time.clone());
		override_with(&mut self.warmup, args.warmup_flag());
		override_with(&mut self.headless, args.headless_flag());
		if args.sequential {
			self.sequential = Some(true);
		}
		if let Some(parallel) = args.parallel {
			self.sequential = Some(false);
			self.parallelism = Some(parallel);
		}
		override_with(&mut self.max_clients, args.max_clients);
		override_with(&mut self.retry.max_attempts, args.max_attempts);
		override_with(&mut self.retry.seed, args.seed);
		override_with(&mut self.driver, args.driver.clone());
		override_with(&mut self.flow, args.flow.clone());
		override_with(&mut self.results_dir, args.results_dir.clone());
		self
	}

	/// Applies `booker check` flags on top of the file settings.
	pub fn merge_check(mut self, args: &CheckArgs) -> Self {
		override_with(&mut self.csv, args.csv.clone());
		override_with(&mut self.max_clients, args.max_clients);
		override_with(&mut self.flow, args.flow.clone());
		self
	}

	pub fn csv_path(&self) -> PathBuf {
		self.csv.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CSV))
	}

	pub fn results_dir(&self) -> PathBuf {
		self.results_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR))
	}

	pub fn driver_endpoint(&self) -> &str {
		self.driver.as_deref().unwrap_or(DEFAULT_ENDPOINT)
	}

	pub fn driver_timeout(&self) -> Duration {
		Duration::from_secs(self.driver_timeout_secs.unwrap_or(DEFAULT_DRIVER_TIMEOUT_SECS))
	}

	pub fn max_clients(&self) -> usize {
		self.max_clients.unwrap_or(plan::DEFAULT_MAX_CLIENTS)
	}

	pub fn mode(&self) -> ConcurrencyMode {
		if self.sequential.unwrap_or(false) {
			ConcurrencyMode::Sequential
		} else {
			ConcurrencyMode::ParallelBounded(self.parallelism.unwrap_or(plan::DEFAULT_PARALLELISM))
		}
	}

	/// Builds the run plan. Relative target times resolve against `now`.
	pub fn plan(&self, now: DateTime<Local>) -> Result<RunPlan> {
		let target = self.target_time.as_deref().map(|input| parse_target_time(input, now)).transpose()?;
		let mut builder = RunPlan::builder()
			.target(target)
			.warmup(self.warmup.unwrap_or(false))
			.mode(self.mode())
			.max_clients(self.max_clients());
		if let Some(headless) = self.headless {
			builder = builder.headless(headless);
		}
		if let Some(secs) = self.warmup_lead_secs {
			builder = builder.warmup_lead(Duration::from_secs(secs));
		}
		if let Some(secs) = self.warmup_timeout_secs {
			builder = builder.warmup_timeout(Duration::from_secs(secs));
		}
		if let Some(secs) = self.heartbeat_secs {
			builder = builder.heartbeat_interval(Duration::from_secs(secs));
		}
		if let Some(secs) = self.attempt_timeout_secs {
			builder = builder.attempt_timeout(Duration::from_secs(secs));
		}
		if let Some(secs) = self.cancel_grace_secs {
			builder = builder.cancel_grace(Duration::from_secs(secs));
		}
		if let Some(secs) = self.retry_budget_secs {
			builder = builder.retry_budget(Duration::from_secs(secs));
		}
		if let Some(policy) = self.cold_dispatch {
			builder = builder.cold_dispatch(policy);
		}

		let retry = &self.retry;
		if let Some(attempts) = retry.max_attempts {
			builder = builder.max_attempts(attempts);
		}
		if retry.base_delay_ms.is_some() || retry.max_delay_ms.is_some() {
			let defaults = plan::RetryConfig::default();
			let base = retry.base_delay_ms.map_or(defaults.base_delay, Duration::from_millis);
			let max = retry.max_delay_ms.map_or(defaults.max_delay, Duration::from_millis);
			builder = builder.backoff(base, max);
		}
		if let Some(jitter) = retry.jitter {
			builder = builder.jitter(jitter);
		}
		if let Some(seed) = retry.seed {
			builder = builder.seed(seed);
		}
		Ok(builder.build()?)
	}
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
	if value.is_some() {
		*slot = value;
	}
}

const DATE_TIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
const TIME_LAYOUTS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Parses a booking window opening instant.
///
/// Accepts RFC 3339, a local `YYYY-MM-DD HH:MM[:SS]`, or a local
/// `HH:MM[:SS]` meaning that time today (which may already be past).
pub fn parse_target_time(input: &str, now: DateTime<Local>) -> Result<DateTime<Utc>> {
	let input = input.trim();
	let invalid = || CliError::TargetTime { input: input.to_string() };

	if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
		return Ok(instant.with_timezone(&Utc));
	}
	let naive = DATE_TIME_LAYOUTS
		.iter()
		.find_map(|layout| NaiveDateTime::parse_from_str(input, layout).ok())
		.or_else(|| {
			TIME_LAYOUTS
				.iter()
				.find_map(|layout| NaiveTime::parse_from_str(input, layout).ok())
				.map(|time| now.date_naive().and_time(time))
		})
		.ok_or_else(invalid)?;

	match Local.from_local_datetime(&naive) {
		LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
		LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
		LocalResult::None => Err(invalid()),
	}
}
