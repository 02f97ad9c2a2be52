//! Browser driver collaborator.
//!
//! The engine never talks to a browser directly. It opens one handle per
//! session through a [`BrowserDriver`] and releases it when the session ends.
//! Implementations must tolerate concurrent calls on distinct handles.

use std::fmt;

use async_trait::async_trait;
use booker_protocol::{Action, InteractOutcome, RetryableReason};
use thiserror::Error;

/// Opaque reference to one browser context owned by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriverHandle(String);

impl DriverHandle {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn id(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DriverHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Driver-level failures. All of them are transient from the engine's view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
	#[error("driver call timed out")]
	Timeout,

	#[error("network error: {0}")]
	Network(String),

	#[error("browser context {0} is closed")]
	Closed(String),

	#[error("driver protocol error: {0}")]
	Protocol(String),
}

impl DriverError {
	/// Maps a driver failure onto the engine's retryable reasons.
	pub fn reason(&self) -> RetryableReason {
		match self {
			DriverError::Timeout => RetryableReason::Timeout,
			DriverError::Network(_) | DriverError::Protocol(_) => RetryableReason::Network,
			DriverError::Closed(_) => RetryableReason::SessionLost,
		}
	}
}

/// Browser automation backend.
#[async_trait]
pub trait BrowserDriver: Send + Sync + 'static {
	/// Opens a fresh browser context.
	async fn open(&self, headless: bool) -> Result<DriverHandle, DriverError>;

	/// Loads `url` in the context.
	async fn navigate(&self, handle: &DriverHandle, url: &str) -> Result<(), DriverError>;

	/// Performs one page interaction.
	async fn interact(&self, handle: &DriverHandle, action: &Action) -> Result<InteractOutcome, DriverError>;

	/// Releases the context. Closing an unknown handle is not an error.
	async fn close(&self, handle: DriverHandle) -> Result<(), DriverError>;
}
