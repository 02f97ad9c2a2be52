//! Errors raised while loading runtime inputs.

use std::path::PathBuf;

use booker::CoreError;
use thiserror::Error;

/// Failures reading the client file.
#[derive(Debug, Error)]
pub enum SourceError {
	#[error("cannot open client file {path}: {source}")]
	Open { path: PathBuf, source: csv::Error },

	#[error("cannot read header of {path}: {source}")]
	Header { path: PathBuf, source: csv::Error },

	#[error("client file {path} has no header row")]
	NoHeader { path: PathBuf },
}

impl From<SourceError> for CoreError {
	fn from(err: SourceError) -> Self {
		CoreError::Source(err.to_string())
	}
}

/// Failures loading a portal flow definition.
#[derive(Debug, Error)]
pub enum FlowError {
	#[error("cannot read flow file {path}: {source}")]
	Read { path: PathBuf, source: std::io::Error },

	#[error("invalid flow definition: {0}")]
	Parse(#[from] serde_json::Error),

	#[error("invalid confirmation pattern: {0}")]
	Pattern(#[from] regex_lite::Error),

	#[error("flow step {step} in `{phase}`: {message}")]
	Step { phase: &'static str, step: usize, message: String },

	#[error("invalid flow definition: {0}")]
	Invalid(String),
}
