//! Data-driven portal adapter.
//!
//! [`FlowPortal`] runs a [`FlowDefinition`] over a session. Page text is
//! classified with [`PageMarkers`] after navigations, on explicit check
//! steps, and whenever a required element is missing, so a "no slots" banner
//! in place of the slot picker is reported as such rather than as a missing
//! element.

pub mod classify;
pub mod flow;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use booker::{Action, Client, FailureReason, InteractOutcome, PortalAdapter, RetryableReason, Session, TerminalReason};
use rand::Rng;
use regex_lite::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use classify::{PageMarkers, PageVerdict};
pub use flow::{FlowDefinition, Step};

use crate::error::FlowError;

/// [`PortalAdapter`] driven by a flow file.
#[derive(Debug, Clone)]
pub struct FlowPortal {
	flow: FlowDefinition,
	reference: Regex,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
	Prepare,
	Book,
	Heartbeat,
}

impl Phase {
	fn as_str(self) -> &'static str {
		match self {
			Phase::Prepare => "prepare",
			Phase::Book => "book",
			Phase::Heartbeat => "heartbeat",
		}
	}
}

impl FlowPortal {
	pub fn new(flow: FlowDefinition) -> Result<Self, FlowError> {
		flow.validate()?;
		let reference = Regex::new(&flow.confirmation.pattern)?;
		Ok(Self { flow, reference })
	}

	pub fn load(path: &Path) -> Result<Self, FlowError> {
		let portal = Self::new(FlowDefinition::load_file(path)?)?;
		info!(target = "booker.flow", flow = portal.flow.display_name(), path = %path.display(), "portal flow loaded");
		Ok(portal)
	}

	pub fn flow(&self) -> &FlowDefinition {
		&self.flow
	}

	async fn run_steps(&self, phase: Phase, steps: &[Step], session: &mut Session, client: Option<&Client>) -> Result<(), FailureReason> {
		for (index, step) in steps.iter().enumerate() {
			debug!(target = "booker.flow", client = %session.client_id(), phase = phase.as_str(), step = index, kind = step.kind(), "step");
			self.run_step(step, session, client).await.inspect_err(|reason| {
				warn!(
					target = "booker.flow",
					client = %session.client_id(),
					phase = phase.as_str(),
					step = index,
					kind = step.kind(),
					%reason,
					"step failed"
				);
			})?;
		}
		Ok(())
	}

	async fn run_step(&self, step: &Step, session: &mut Session, client: Option<&Client>) -> Result<(), FailureReason> {
		match step {
			Step::Goto { url } => {
				session.navigate(&flow::render_for(url, client)).await?;
				self.check_page(session, false).await
			}
			Step::Click { selectors, optional } => {
				let action = Action::Click {
					selectors: selectors.clone(),
				};
				self.element(session, &action, *optional).await
			}
			Step::Fill {
				selectors,
				value,
				human,
				optional,
			} => {
				let value = flow::render_for(value, client);
				if value.is_empty() {
					debug!(target = "booker.flow", client = %session.client_id(), "empty value, fill skipped");
					return Ok(());
				}
				let action = Action::Fill {
					selectors: selectors.clone(),
					value,
					human: *human,
				};
				self.element(session, &action, *optional).await
			}
			Step::Select {
				selectors,
				option,
				optional,
			} => {
				let option = flow::render_for(option, client);
				if option.is_empty() {
					debug!(target = "booker.flow", client = %session.client_id(), "empty option, select skipped");
					return Ok(());
				}
				let action = Action::Select {
					selectors: selectors.clone(),
					option,
				};
				self.element(session, &action, *optional).await
			}
			Step::WaitFor {
				selectors,
				timeout_ms,
				optional,
			} => {
				let action = Action::WaitFor {
					selectors: selectors.clone(),
					timeout_ms: *timeout_ms,
				};
				self.element(session, &action, *optional).await
			}
			Step::Pause { min_ms, max_ms } => {
				tokio::time::sleep(pause_length(*min_ms, *max_ms)).await;
				Ok(())
			}
			Step::CheckSlots { poll_ms, max_wait_ms, url } => {
				let monitor = Duration::from_millis(*max_wait_ms);
				self.watch_slots(session, client, Duration::from_millis(*poll_ms), monitor, url.as_deref()).await
			}
			Step::CheckPage => self.check_page(session, false).await,
		}
	}

	/// Runs an element action. A missing required element is explained by
	/// the page when a marker matches, else reported as unavailable.
	async fn element(&self, session: &mut Session, action: &Action, optional: bool) -> Result<(), FailureReason> {
		match session.interact(action).await? {
			InteractOutcome::NotFound if optional => {
				debug!(target = "booker.flow", client = %session.client_id(), action = action.name(), "optional element absent");
				Ok(())
			}
			InteractOutcome::NotFound => {
				let page = page_source(session).await?;
				Err(self
					.flow
					.markers
					.classify(&page)
					.failure()
					.unwrap_or(RetryableReason::Unavailable.into()))
			}
			InteractOutcome::Done | InteractOutcome::Text { .. } => Ok(()),
		}
	}

	/// Classifies the current page, waiting for an interstitial challenge
	/// to pass on its own for up to the configured time.
	async fn check_page(&self, session: &mut Session, slots: bool) -> Result<(), FailureReason> {
		let wait = self.flow.challenge_wait;
		let deadline = Instant::now() + Duration::from_millis(wait.timeout_ms);
		let mut challenged = false;
		loop {
			let page = page_source(session).await?;
			match self.flow.markers.classify(&page) {
				PageVerdict::Challenge => {
					if Instant::now() >= deadline {
						warn!(target = "booker.flow", client = %session.client_id(), waited_ms = wait.timeout_ms, "challenge did not clear");
						return Err(RetryableReason::Challenge.into());
					}
					if !challenged {
						info!(target = "booker.flow", client = %session.client_id(), "challenge page, waiting for it to clear");
						challenged = true;
					}
					tokio::time::sleep(Duration::from_millis(wait.poll_ms)).await;
				}
				PageVerdict::NoSlots if !slots => return Ok(()),
				verdict => {
					if challenged && verdict == PageVerdict::Clear {
						info!(target = "booker.flow", client = %session.client_id(), "challenge cleared");
					}
					return verdict.failure().map_or(Ok(()), Err);
				}
			}
		}
	}

	/// Checks for slots, reloading every `poll` while the page says there are
	/// none, for up to `monitor`. A zero `monitor` checks once.
	async fn watch_slots(
		&self,
		session: &mut Session,
		client: Option<&Client>,
		poll: Duration,
		monitor: Duration,
		url: Option<&str>,
	) -> Result<(), FailureReason> {
		let until = Instant::now() + monitor;
		let mut polls = 0u32;
		loop {
			match self.check_page(session, true).await {
				Err(FailureReason::Terminal(TerminalReason::NoSlots)) if Instant::now() + poll <= until => {
					polls += 1;
					info!(target = "booker.flow", client = %session.client_id(), polls, next_ms = poll.as_millis() as u64, "no slots yet");
					tokio::time::sleep(poll).await;
					self.reload(session, client, url).await?;
				}
				Err(FailureReason::Terminal(TerminalReason::NoSlots)) if polls > 0 => {
					warn!(target = "booker.flow", client = %session.client_id(), polls, "no slots within the monitoring window");
					return Err(TerminalReason::NoSlots.into());
				}
				Ok(()) if polls > 0 => {
					info!(target = "booker.flow", client = %session.client_id(), polls, "slots available");
					return Ok(());
				}
				other => return other,
			}
		}
	}

	/// Loads `url`, or reloads the current page when the driver reports one.
	async fn reload(&self, session: &mut Session, client: Option<&Client>, url: Option<&str>) -> Result<(), FailureReason> {
		let target = match url {
			Some(url) => Some(flow::render_for(url, client)),
			None => session.interact(&Action::CurrentUrl).await?.text().map(str::to_string),
		};
		match target {
			Some(target) if !target.is_empty() => session.navigate(&target).await,
			_ => Ok(()),
		}
	}

	/// Reads the booking reference after a submission.
	async fn confirmation(&self, session: &mut Session) -> Result<String, FailureReason> {
		let confirmation = &self.flow.confirmation;
		for selector in &confirmation.selectors {
			let action = Action::ReadText {
				selectors: vec![selector.clone()],
			};
			let Some(text) = session.interact(&action).await?.text().map(str::to_string) else {
				continue;
			};
			if let Some(found) = self.reference.find(text.trim()) {
				return Ok(found.as_str().to_string());
			}
		}
		info!(target = "booker.flow", client = %session.client_id(), "no confirmation reference shown");
		Ok(confirmation.fallback.clone())
	}
}

async fn page_source(session: &mut Session) -> Result<String, FailureReason> {
	match session.interact(&Action::PageSource).await? {
		InteractOutcome::Text { value } => Ok(value),
		_ => Err(RetryableReason::Network.into()),
	}
}

fn pause_length(min_ms: u64, max_ms: u64) -> Duration {
	if min_ms >= max_ms {
		return Duration::from_millis(min_ms);
	}
	Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

#[async_trait]
impl PortalAdapter for FlowPortal {
	async fn prepare(&self, session: &mut Session, client: &Client) -> Result<(), FailureReason> {
		session.navigate(&flow::render_for(&self.flow.login_url, Some(client))).await?;
		self.check_page(session, false).await?;
		self.run_steps(Phase::Prepare, &self.flow.prepare, session, Some(client)).await?;
		debug!(target = "booker.flow", client = %client.id, "prepared");
		Ok(())
	}

	async fn heartbeat(&self, session: &mut Session) -> Result<(), FailureReason> {
		self.run_steps(Phase::Heartbeat, &self.flow.heartbeat, session, None).await
	}

	async fn book(&self, session: &mut Session, client: &Client) -> Result<String, FailureReason> {
		if let Some(url) = &self.flow.booking_url {
			session.navigate(&flow::render_for(url, Some(client))).await?;
			self.check_page(session, false).await?;
		}
		self.run_steps(Phase::Book, &self.flow.book, session, Some(client)).await?;
		self.confirmation(session).await
	}
}
