//! Error types for the booking engine.
//!
//! Per-client failures are never errors: they are [`crate::FailureReason`]s
//! recorded in the client's result. The variants here cover what can stop a
//! run before dispatch begins, plus load-time record problems that are
//! downgraded to warnings by [`crate::queue::ClientQueue::load`].

use thiserror::Error;

/// Errors that can occur in the booking engine.
#[derive(Debug, Error)]
pub enum CoreError {
	#[error("invalid run plan: {0}")]
	InvalidPlan(String),

	#[error("invalid client data at record {record}: {message}")]
	InvalidClientData { record: usize, message: String },

	#[error("client source unavailable: {0}")]
	Source(String),

	#[error("report failed: {0}")]
	Report(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
