//! Portal collaborator.
//!
//! A [`PortalAdapter`] knows the target portal's pages and turns what it sees
//! into [`FailureReason`]s. Bot challenges, blocks and "no slots" banners are
//! classified here, so the engine itself only ever sees closed reasons.

use async_trait::async_trait;
use booker_protocol::{Client, FailureReason};

use crate::session::Session;

/// Portal page flows driven over a [`Session`].
#[async_trait]
pub trait PortalAdapter: Send + Sync + 'static {
	/// Loads the portal, waits out any challenge and authenticates.
	///
	/// Runs during warmup, or at the start of an attempt on a cold session.
	async fn prepare(&self, session: &mut Session, client: &Client) -> Result<(), FailureReason>;

	/// Cheap interaction that keeps a warm session from expiring.
	///
	/// Any error means the session can no longer be trusted.
	async fn heartbeat(&self, session: &mut Session) -> Result<(), FailureReason>;

	/// Runs the booking flow on a prepared session and returns the
	/// confirmation reference.
	async fn book(&self, session: &mut Session, client: &Client) -> Result<String, FailureReason>;
}
