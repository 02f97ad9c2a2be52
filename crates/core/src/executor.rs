//! One booking attempt for one client.

use std::sync::Arc;
use std::time::Duration;

use booker_protocol::{AbandonReason, AttemptResult, Client, FailureReason, RetryableReason};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::BrowserDriver;
use crate::plan::RunPlan;
use crate::portal::PortalAdapter;
use crate::session::Session;

/// Drives a session through the portal's booking flow.
///
/// An attempt always ends in an [`AttemptResult`] and always closes its
/// session, whichever way it ends.
#[derive(Clone)]
pub struct AttemptExecutor {
	driver: Arc<dyn BrowserDriver>,
	portal: Arc<dyn PortalAdapter>,
	headless: bool,
	attempt_timeout: Duration,
}

impl AttemptExecutor {
	pub fn new(driver: Arc<dyn BrowserDriver>, portal: Arc<dyn PortalAdapter>, plan: &RunPlan) -> Self {
		Self {
			driver,
			portal,
			headless: plan.headless,
			attempt_timeout: plan.attempt_timeout,
		}
	}

	/// Runs one attempt on `session`, preparing it first if it is cold.
	///
	/// Bounded by the attempt timeout (`FailedRetryable{Timeout}`); firing
	/// `abort` ends it as `Abandoned{Cancelled}`.
	pub async fn attempt(&self, mut session: Session, client: &Client, abort: &CancellationToken) -> AttemptResult {
		let warm = session.is_warm();
		let outcome = {
			let flow = async {
				if !session.is_warm() {
					self.portal.prepare(&mut session, client).await?;
					session.mark_warm();
				}
				self.portal.book(&mut session, client).await
			};
			tokio::select! {
				biased;
				_ = abort.cancelled() => None,
				result = tokio::time::timeout(self.attempt_timeout, flow) => Some(result),
			}
		};
		session.close().await;

		let result = match outcome {
			None => AttemptResult::abandoned(AbandonReason::Cancelled),
			Some(Err(_)) => AttemptResult::FailedRetryable {
				reason: RetryableReason::Timeout,
			},
			Some(Ok(Ok(confirmation_ref))) => AttemptResult::Succeeded { confirmation_ref },
			Some(Ok(Err(reason))) => AttemptResult::failed(reason),
		};
		match &result {
			AttemptResult::Succeeded { confirmation_ref } => {
				info!(target = "booker.executor", client = %client.id, warm, confirmation = %confirmation_ref, "booking confirmed")
			}
			other => warn!(target = "booker.executor", client = %client.id, warm, result = %other, "attempt did not book"),
		}
		result
	}

	/// Opens a cold session and runs [`attempt`](Self::attempt) on it.
	pub async fn attempt_cold(&self, client: &Client, abort: &CancellationToken) -> AttemptResult {
		let open = Session::open(Arc::clone(&self.driver), client.id.clone(), self.headless);
		let opened = tokio::select! {
			biased;
			_ = abort.cancelled() => return AttemptResult::abandoned(AbandonReason::Cancelled),
			opened = tokio::time::timeout(self.attempt_timeout, open) => opened,
		};
		match opened {
			Ok(Ok(session)) => {
				debug!(target = "booker.executor", client = %client.id, handle = %session.handle(), "cold session opened");
				self.attempt(session, client, abort).await
			}
			Ok(Err(reason)) => AttemptResult::failed(reason),
			Err(_) => AttemptResult::failed(FailureReason::Retryable(RetryableReason::Timeout)),
		}
	}
}
