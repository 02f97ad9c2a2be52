//! Page classification by marker phrases.
//!
//! Portals signal challenges, blocks and refusals through page text rather
//! than status codes. [`PageMarkers::classify`] reduces a page source to a
//! [`PageVerdict`] with case-insensitive substring matching.

use booker::{FailureReason, RetryableReason, TerminalReason};
use serde::{Deserialize, Serialize};

/// What a page says about the session, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
	/// Hard block page; waiting does not clear it.
	Blocked,
	/// Interstitial bot challenge that may auto-pass.
	Challenge,
	/// The portal logged the session out.
	SessionExpired,
	AuthRejected,
	Rejected,
	NoSlots,
	Clear,
}

impl PageVerdict {
	/// Failure a verdict maps to, `None` for a clear page.
	///
	/// A challenge only becomes a failure once the wait for it to pass runs
	/// out; callers decide when that is.
	pub fn failure(self) -> Option<FailureReason> {
		match self {
			PageVerdict::Blocked => Some(TerminalReason::ChallengeUnsolvable.into()),
			PageVerdict::Challenge => Some(RetryableReason::Challenge.into()),
			PageVerdict::SessionExpired => Some(RetryableReason::SessionLost.into()),
			PageVerdict::AuthRejected => Some(TerminalReason::AuthRejected.into()),
			PageVerdict::Rejected => Some(TerminalReason::Rejected.into()),
			PageVerdict::NoSlots => Some(TerminalReason::NoSlots.into()),
			PageVerdict::Clear => None,
		}
	}
}

/// Marker phrases per verdict. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMarkers {
	pub block: Vec<String>,
	pub challenge: Vec<String>,
	pub session_expired: Vec<String>,
	pub auth_rejected: Vec<String>,
	pub rejected: Vec<String>,
	pub no_slots: Vec<String>,
}

impl Default for PageMarkers {
	fn default() -> Self {
		Self {
			block: phrases(&["you have been blocked", "error 1020", "access denied", "acesso restrito", "atividade incomum", "403201"]),
			challenge: phrases(&[
				"just a moment",
				"checking your browser",
				"cf-challenge",
				"cf-browser-verification",
				"ddos protection by cloudflare",
			]),
			session_expired: phrases(&["session has expired", "session expired", "please log in again"]),
			auth_rejected: phrases(&["invalid username or password", "incorrect email or password", "account has been locked"]),
			rejected: phrases(&["application has been rejected", "not eligible to book"]),
			no_slots: phrases(&[
				"no appointments available",
				"no slots available",
				"fully booked",
				"there are no available",
				"appointments are not available",
				"não existem",
			]),
		}
	}
}

fn phrases(list: &[&str]) -> Vec<String> {
	list.iter().map(|phrase| phrase.to_string()).collect()
}

impl PageMarkers {
	/// Classifies `page`; the most severe matching verdict wins.
	pub fn classify(&self, page: &str) -> PageVerdict {
		let page = page.to_lowercase();
		let hit = |markers: &[String]| markers.iter().any(|marker| !marker.is_empty() && page.contains(&marker.to_lowercase()));

		if hit(&self.block) {
			PageVerdict::Blocked
		} else if hit(&self.challenge) {
			PageVerdict::Challenge
		} else if hit(&self.session_expired) {
			PageVerdict::SessionExpired
		} else if hit(&self.auth_rejected) {
			PageVerdict::AuthRejected
		} else if hit(&self.rejected) {
			PageVerdict::Rejected
		} else if hit(&self.no_slots) {
			PageVerdict::NoSlots
		} else {
			PageVerdict::Clear
		}
	}
}
