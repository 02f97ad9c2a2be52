//! Live browser session bound to one client.

use std::sync::Arc;
use std::time::Duration;

use booker_protocol::{Action, ClientId, FailureReason, InteractOutcome};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, DriverHandle};

/// Upper bound on a driver close call.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the portal flow has already been prepared on this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warmth {
	/// Portal loaded, challenge passed, authenticated.
	Warm,
	/// Browser context only.
	Cold,
}

/// A browser context owned by exactly one holder at a time.
///
/// `Session` is not `Clone`: it moves from the warmer's keep-alive task to the
/// executor, and [`Session::close`] consumes it. A session dropped without
/// being closed schedules the driver close on the current runtime.
pub struct Session {
	client_id: ClientId,
	driver: Arc<dyn BrowserDriver>,
	handle: DriverHandle,
	warmth: Warmth,
	created_at: DateTime<Utc>,
	last_activity: DateTime<Utc>,
	closed: bool,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("client_id", &self.client_id)
			.field("handle", &self.handle)
			.field("warmth", &self.warmth)
			.field("created_at", &self.created_at)
			.field("last_activity", &self.last_activity)
			.finish()
	}
}

impl Session {
	/// Opens a cold session for `client_id`.
	pub async fn open(driver: Arc<dyn BrowserDriver>, client_id: ClientId, headless: bool) -> Result<Self, FailureReason> {
		let handle = driver.open(headless).await.map_err(|err| {
			warn!(target = "booker.session", client = %client_id, error = %err, "browser open failed");
			FailureReason::from(err.reason())
		})?;
		let now = Utc::now();
		debug!(target = "booker.session", client = %client_id, %handle, "session opened");
		Ok(Self {
			client_id,
			driver,
			handle,
			warmth: Warmth::Cold,
			created_at: now,
			last_activity: now,
			closed: false,
		})
	}

	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	pub fn handle(&self) -> &DriverHandle {
		&self.handle
	}

	pub fn warmth(&self) -> Warmth {
		self.warmth
	}

	pub fn is_warm(&self) -> bool {
		self.warmth == Warmth::Warm
	}

	pub fn created_at(&self) -> DateTime<Utc> {
		self.created_at
	}

	pub fn last_activity(&self) -> DateTime<Utc> {
		self.last_activity
	}

	/// Records that the portal flow has been prepared on this session.
	pub fn mark_warm(&mut self) {
		self.warmth = Warmth::Warm;
	}

	/// Loads `url`, mapping driver failures to retryable reasons.
	pub async fn navigate(&mut self, url: &str) -> Result<(), FailureReason> {
		self.last_activity = Utc::now();
		self.driver
			.navigate(&self.handle, url)
			.await
			.map_err(|err| FailureReason::from(err.reason()))
	}

	/// Performs one interaction, mapping driver failures to retryable reasons.
	pub async fn interact(&mut self, action: &Action) -> Result<InteractOutcome, FailureReason> {
		self.last_activity = Utc::now();
		self.driver
			.interact(&self.handle, action)
			.await
			.map_err(|err| FailureReason::from(err.reason()))
	}

	/// Closes the browser context. Failures are logged; the session is gone either way.
	pub async fn close(mut self) {
		self.closed = true;
		let handle = self.handle.clone();
		match tokio::time::timeout(CLOSE_TIMEOUT, self.driver.close(handle)).await {
			Ok(Ok(())) => debug!(target = "booker.session", client = %self.client_id, handle = %self.handle, "session closed"),
			Ok(Err(err)) => warn!(target = "booker.session", client = %self.client_id, error = %err, "session close failed"),
			Err(_) => warn!(target = "booker.session", client = %self.client_id, "session close timed out"),
		}
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if self.closed {
			return;
		}
		let driver = Arc::clone(&self.driver);
		let handle = self.handle.clone();
		let client = self.client_id.clone();
		match tokio::runtime::Handle::try_current() {
			Ok(rt) => {
				debug!(target = "booker.session", %client, %handle, "session dropped open; closing in background");
				rt.spawn(async move {
					if let Err(err) = driver.close(handle).await {
						warn!(target = "booker.session", %client, error = %err, "background session close failed");
					}
				});
			}
			Err(_) => warn!(target = "booker.session", %client, %handle, "session dropped outside a runtime; handle leaked"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sim::SimDriver;

	#[tokio::test]
	async fn close_releases_handle() {
		let driver = Arc::new(SimDriver::new());
		let session = Session::open(driver.clone(), ClientId::new("a"), true).await.unwrap();
		assert_eq!(driver.open_handles(), 1);
		assert!(!session.is_warm());
		session.close().await;
		assert_eq!(driver.open_handles(), 0);
	}

	#[tokio::test]
	async fn drop_without_close_still_releases_handle() {
		let driver = Arc::new(SimDriver::new());
		let session = Session::open(driver.clone(), ClientId::new("a"), true).await.unwrap();
		drop(session);
		for _ in 0..20 {
			if driver.open_handles() == 0 {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert_eq!(driver.open_handles(), 0);
	}

	#[tokio::test]
	async fn open_failure_maps_to_retryable_reason() {
		let driver = Arc::new(SimDriver::new());
		driver.fail_next_opens(1);
		let err = Session::open(driver, ClientId::new("a"), true).await.unwrap_err();
		assert!(err.is_retryable());
	}
}
