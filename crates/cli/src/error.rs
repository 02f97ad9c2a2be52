use std::path::PathBuf;

use booker::{CoreError, DriverError};
use booker_runtime::FlowError;
use thiserror::Error;

use crate::output::ErrorCode;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Core(#[from] CoreError),

	#[error(transparent)]
	Flow(#[from] FlowError),

	#[error("invalid target time {input:?}: expected RFC 3339, \"YYYY-MM-DD HH:MM[:SS]\" or \"HH:MM[:SS]\"")]
	TargetTime { input: String },

	#[error("cannot read config {path}: {source}")]
	ConfigRead { path: PathBuf, source: std::io::Error },

	#[error("invalid config {path}: {source}")]
	ConfigParse { path: PathBuf, source: serde_json::Error },

	#[error("a portal flow file is required for a live run (use --flow, or --dry-run)")]
	MissingFlow,

	#[error("{0:#}")]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

impl CliError {
	/// Error code reported in JSON envelopes.
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Core(CoreError::InvalidPlan(_)) | CliError::TargetTime { .. } | CliError::MissingFlow => ErrorCode::InvalidInput,
			CliError::Core(CoreError::Source(_) | CoreError::InvalidClientData { .. }) => ErrorCode::SourceError,
			CliError::Core(CoreError::Io(_)) => ErrorCode::IoError,
			CliError::Other(err) if err.downcast_ref::<DriverError>().is_some() => ErrorCode::DriverError,
			CliError::Core(_) | CliError::Other(_) => ErrorCode::InternalError,
			CliError::Flow(_) => ErrorCode::FlowError,
			CliError::ConfigRead { .. } | CliError::ConfigParse { .. } => ErrorCode::ConfigError,
		}
	}
}
