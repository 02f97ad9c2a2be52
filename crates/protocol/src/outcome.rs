//! Attempt outcomes and the closed set of failure reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure that may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableReason {
	/// A driver call or the whole attempt exceeded its deadline.
	Timeout,
	/// Transport failure between driver and portal or driver and us.
	Network,
	/// Portal temporarily refused service or an expected element was missing.
	Unavailable,
	/// Bot challenge seen and not passed within the wait window.
	Challenge,
	/// Browser context closed or the portal logged the session out.
	SessionLost,
}

/// Failure whose outcome is final for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
	/// No slots are offered for the client's category.
	NoSlots,
	/// Portal permanently rejected the client's credentials.
	AuthRejected,
	/// Portal rejected the submission on business rules.
	Rejected,
	/// Hard block that no amount of waiting clears.
	ChallengeUnsolvable,
	/// Warmup never produced a session and cold dispatch is refused.
	WarmupFailed,
	/// The attempt task crashed.
	Internal,
}

/// Why a client was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
	MaxRetriesExceeded,
	DeadlineExceeded,
	Cancelled,
}

/// Classified failure of one warmup or booking interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FailureReason {
	Retryable(RetryableReason),
	Terminal(TerminalReason),
}

impl FailureReason {
	pub fn is_retryable(&self) -> bool {
		matches!(self, FailureReason::Retryable(_))
	}
}

impl From<RetryableReason> for FailureReason {
	fn from(reason: RetryableReason) -> Self {
		FailureReason::Retryable(reason)
	}
}

impl From<TerminalReason> for FailureReason {
	fn from(reason: TerminalReason) -> Self {
		FailureReason::Terminal(reason)
	}
}

impl fmt::Display for RetryableReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RetryableReason::Timeout => write!(f, "timeout"),
			RetryableReason::Network => write!(f, "network"),
			RetryableReason::Unavailable => write!(f, "unavailable"),
			RetryableReason::Challenge => write!(f, "challenge"),
			RetryableReason::SessionLost => write!(f, "session_lost"),
		}
	}
}

impl fmt::Display for TerminalReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TerminalReason::NoSlots => write!(f, "no_slots"),
			TerminalReason::AuthRejected => write!(f, "auth_rejected"),
			TerminalReason::Rejected => write!(f, "rejected"),
			TerminalReason::ChallengeUnsolvable => write!(f, "challenge_unsolvable"),
			TerminalReason::WarmupFailed => write!(f, "warmup_failed"),
			TerminalReason::Internal => write!(f, "internal"),
		}
	}
}

impl fmt::Display for AbandonReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AbandonReason::MaxRetriesExceeded => write!(f, "max_retries_exceeded"),
			AbandonReason::DeadlineExceeded => write!(f, "deadline_exceeded"),
			AbandonReason::Cancelled => write!(f, "cancelled"),
		}
	}
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FailureReason::Retryable(r) => write!(f, "retryable:{r}"),
			FailureReason::Terminal(r) => write!(f, "terminal:{r}"),
		}
	}
}

/// Outcome of one booking attempt for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptResult {
	Succeeded {
		confirmation_ref: String,
	},
	FailedRetryable {
		reason: RetryableReason,
	},
	FailedTerminal {
		reason: TerminalReason,
	},
	Abandoned {
		reason: AbandonReason,
		/// Last classified failure before giving up, if any attempt ran.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		last_failure: Option<FailureReason>,
	},
}

impl AttemptResult {
	/// Builds the failed variant matching a classified reason.
	pub fn failed(reason: FailureReason) -> Self {
		match reason {
			FailureReason::Retryable(reason) => AttemptResult::FailedRetryable { reason },
			FailureReason::Terminal(reason) => AttemptResult::FailedTerminal { reason },
		}
	}

	pub fn abandoned(reason: AbandonReason) -> Self {
		AttemptResult::Abandoned { reason, last_failure: None }
	}

	/// `true` for results that end a client's run.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, AttemptResult::FailedRetryable { .. })
	}

	pub fn is_success(&self) -> bool {
		matches!(self, AttemptResult::Succeeded { .. })
	}
}

impl fmt::Display for AttemptResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AttemptResult::Succeeded { confirmation_ref } => write!(f, "succeeded ({confirmation_ref})"),
			AttemptResult::FailedRetryable { reason } => write!(f, "failed, retryable ({reason})"),
			AttemptResult::FailedTerminal { reason } => write!(f, "failed ({reason})"),
			AttemptResult::Abandoned {
				reason,
				last_failure: Some(last),
			} => write!(f, "abandoned ({reason}, last {last})"),
			AttemptResult::Abandoned { reason, last_failure: None } => write!(f, "abandoned ({reason})"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn failed_maps_reason_kind_to_variant() {
		assert_eq!(
			AttemptResult::failed(RetryableReason::Timeout.into()),
			AttemptResult::FailedRetryable {
				reason: RetryableReason::Timeout
			}
		);
		assert_eq!(
			AttemptResult::failed(TerminalReason::NoSlots.into()),
			AttemptResult::FailedTerminal {
				reason: TerminalReason::NoSlots
			}
		);
	}

	#[test]
	fn only_retryable_failure_is_non_terminal() {
		assert!(!AttemptResult::failed(RetryableReason::Network.into()).is_terminal());
		assert!(AttemptResult::failed(TerminalReason::Rejected.into()).is_terminal());
		assert!(AttemptResult::abandoned(AbandonReason::Cancelled).is_terminal());
		assert!(
			AttemptResult::Succeeded {
				confirmation_ref: "X".into()
			}
			.is_terminal()
		);
	}

	#[test]
	fn results_serialize_with_status_tag() {
		let json = serde_json::to_value(AttemptResult::Abandoned {
			reason: AbandonReason::MaxRetriesExceeded,
			last_failure: Some(RetryableReason::Challenge.into()),
		})
		.unwrap();
		assert_eq!(json["status"], "abandoned");
		assert_eq!(json["reason"], "max_retries_exceeded");
		assert_eq!(json["last_failure"]["kind"], "retryable");
		assert_eq!(json["last_failure"]["reason"], "challenge");
	}
}
