//! Session pre-warming ahead of the booking window.
//!
//! [`Warmer::spawn`] starts one keep-alive task per client. The task owns the
//! client's [`Session`] outright: it opens and prepares it (retrying per the
//! [`RetryPolicy`] until the warm deadline), then heartbeats it until someone
//! claims it. [`WarmTicket::claim`] sends the task a one-shot reply channel;
//! the task answers by moving the session into it. Nothing else ever holds a
//! reference to a warm session.
//!
//! Dropping or [`releasing`](WarmTicket::release) a ticket without claiming it
//! closes the session.
//!
//! Warm calls never outlive the warm deadline: each one is bounded by
//! `min(warmup_timeout, time left)`, and [`Warmer::close_window`] stops every
//! warmup still in progress so its ticket claims as [`Claim::Incomplete`].

use std::sync::Arc;
use std::time::Duration;

use booker_protocol::{Client, ClientId, FailureReason, RetryableReason, TerminalReason};
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{self, SharedClock};
use crate::driver::BrowserDriver;
use crate::plan::RunPlan;
use crate::portal::PortalAdapter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::session::Session;

/// Progress of one client's warmup, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmStatus {
	Warming { last_failure: Option<FailureReason> },
	Ready,
	Failed { reason: FailureReason },
}

impl WarmStatus {
	/// `Ready` or `Failed`: nothing more will happen before the claim.
	pub fn is_settled(&self) -> bool {
		!matches!(self, WarmStatus::Warming { .. })
	}
}

/// Answer to a claim.
#[derive(Debug)]
pub enum Claim {
	/// Warm session, now owned by the claimant.
	Ready(Session),
	/// Warmup gave up.
	Failed(FailureReason),
	/// Warmup was still in progress (or had lost its session) at claim time.
	Incomplete { last_failure: Option<FailureReason> },
}

impl Claim {
	/// The warmup failure to report, if the claim did not produce a session.
	pub fn warmup_failure(&self) -> Option<FailureReason> {
		match self {
			Claim::Ready(_) => None,
			Claim::Failed(reason) => Some(*reason),
			Claim::Incomplete { last_failure } => *last_failure,
		}
	}
}

type ClaimReply = oneshot::Sender<Claim>;

/// Handle to one client's keep-alive task.
#[derive(Debug)]
pub struct WarmTicket {
	client_id: ClientId,
	claims: oneshot::Sender<ClaimReply>,
	status: watch::Receiver<WarmStatus>,
	task: JoinHandle<()>,
}

impl WarmTicket {
	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	pub fn status(&self) -> WarmStatus {
		*self.status.borrow()
	}

	/// Receiver that observes every status change.
	pub fn watch(&self) -> watch::Receiver<WarmStatus> {
		self.status.clone()
	}

	/// Takes the warm session, or learns why there is none.
	pub async fn claim(self) -> Claim {
		let WarmTicket { claims, status, .. } = self;
		let (reply_tx, reply_rx) = oneshot::channel();
		if claims.send(reply_tx).is_ok() {
			if let Ok(claim) = reply_rx.await {
				return claim;
			}
		}
		// The task is gone; fall back on the last status it published.
		match *status.borrow() {
			WarmStatus::Failed { reason } => Claim::Failed(reason),
			WarmStatus::Warming { last_failure } => Claim::Incomplete { last_failure },
			WarmStatus::Ready => Claim::Incomplete { last_failure: None },
		}
	}

	/// Gives the ticket up and waits until its session is closed.
	pub async fn release(self) {
		let WarmTicket { claims, task, .. } = self;
		drop(claims);
		if let Err(err) = task.await {
			warn!(target = "booker.warmer", error = %err, "keep-alive task ended abnormally");
		}
	}
}

struct WarmerInner {
	driver: Arc<dyn BrowserDriver>,
	portal: Arc<dyn PortalAdapter>,
	permits: Arc<Semaphore>,
	retry: RetryPolicy,
	clock: SharedClock,
	cancel: CancellationToken,
	window: CancellationToken,
	headless: bool,
	warmup_timeout: Duration,
	heartbeat_interval: Duration,
}

/// Spawns and owns keep-alive tasks.
#[derive(Clone)]
pub struct Warmer {
	inner: Arc<WarmerInner>,
}

impl Warmer {
	/// Warm calls take permits from `permits`, the same semaphore that bounds
	/// booking attempts. Cancelling `cancel` closes every warm session.
	pub fn new(
		driver: Arc<dyn BrowserDriver>,
		portal: Arc<dyn PortalAdapter>,
		permits: Arc<Semaphore>,
		retry: RetryPolicy,
		plan: &RunPlan,
		clock: SharedClock,
		cancel: CancellationToken,
	) -> Self {
		Self {
			inner: Arc::new(WarmerInner {
				driver,
				portal,
				permits,
				retry,
				clock,
				cancel,
				window: CancellationToken::new(),
				headless: plan.headless,
				warmup_timeout: plan.warmup_timeout,
				heartbeat_interval: plan.heartbeat_interval,
			}),
		}
	}

	/// Starts warming `client`; retries stop at `deadline`.
	pub fn spawn(&self, client: Arc<Client>, deadline: DateTime<Utc>) -> WarmTicket {
		let (claims_tx, claims_rx) = oneshot::channel();
		let (status_tx, status_rx) = watch::channel(WarmStatus::Warming { last_failure: None });
		let client_id = client.id.clone();
		let task = tokio::spawn(Arc::clone(&self.inner).keep_warm(client, deadline, claims_rx, status_tx));
		WarmTicket {
			client_id,
			claims: claims_tx,
			status: status_rx,
			task,
		}
	}

	/// Stops every keep-alive task.
	pub fn shutdown(&self) {
		self.inner.cancel.cancel();
	}

	/// Marks the booking window as open. Warmups still running are dropped
	/// and no new warm call starts; warm sessions keep heartbeating until
	/// claimed.
	pub fn close_window(&self) {
		self.inner.window.cancel();
	}
}

const TIMEOUT: FailureReason = FailureReason::Retryable(RetryableReason::Timeout);

fn answer(request: Result<ClaimReply, oneshot::error::RecvError>, claim: Claim) {
	if let Ok(reply) = request {
		let _ = reply.send(claim);
	}
}

impl WarmerInner {
	async fn keep_warm(
		self: Arc<Self>,
		client: Arc<Client>,
		deadline: DateTime<Utc>,
		mut claims: oneshot::Receiver<ClaimReply>,
		status: watch::Sender<WarmStatus>,
	) {
		let policy = self.retry.with_cutoff(deadline);
		let id = &client.id;
		let mut attempts = 0u32;
		let mut last_failure: Option<FailureReason> = None;

		loop {
			let warmed = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return,
				_ = self.window.cancelled() => {
					warn!(target = "booker.warmer", client = %id, attempts, "window opened before warmup finished");
					self.hold_incomplete(claims, last_failure.or(Some(TIMEOUT))).await;
					return;
				}
				request = &mut claims => {
					answer(request, Claim::Incomplete { last_failure });
					return;
				}
				result = self.warm_once(&client, deadline) => result,
			};
			attempts += 1;

			let mut session = match warmed {
				Ok(session) => session,
				Err(reason) => {
					last_failure = Some(reason);
					match policy.should_retry(attempts, &reason) {
						RetryDecision::Retry { after } => {
							debug!(target = "booker.warmer", client = %id, attempts, %reason, delay_ms = after.as_millis() as u64, "warmup failed; retrying");
							status.send_replace(WarmStatus::Warming { last_failure });
							tokio::select! {
								biased;
								_ = self.cancel.cancelled() => return,
								_ = self.window.cancelled() => {
									self.hold_incomplete(claims, last_failure).await;
									return;
								}
								request = &mut claims => {
									answer(request, Claim::Incomplete { last_failure });
									return;
								}
								_ = tokio::time::sleep(after) => continue,
							}
						}
						RetryDecision::Abandon { .. } | RetryDecision::Stop => {
							warn!(target = "booker.warmer", client = %id, attempts, %reason, "warmup failed");
							status.send_replace(WarmStatus::Failed { reason });
							tokio::select! {
								biased;
								_ = self.cancel.cancelled() => {}
								request = &mut claims => answer(request, Claim::Failed(reason)),
							}
							return;
						}
					}
				}
			};

			info!(target = "booker.warmer", client = %id, attempts, handle = %session.handle(), "session warm");
			status.send_replace(WarmStatus::Ready);

			let period = self.heartbeat_interval;
			let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
			heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
			let lost = loop {
				tokio::select! {
					biased;
					_ = self.cancel.cancelled() => {
						session.close().await;
						return;
					}
					request = &mut claims => {
						match request {
							Ok(reply) => {
								debug!(target = "booker.warmer", client = %id, "handing over warm session");
								if let Err(Claim::Ready(session)) = reply.send(Claim::Ready(session)) {
									session.close().await;
								}
							}
							Err(_) => session.close().await,
						}
						return;
					}
					_ = heartbeat.tick() => {
						match tokio::time::timeout(self.warmup_timeout, self.portal.heartbeat(&mut session)).await {
							Ok(Ok(())) => debug!(target = "booker.warmer", client = %id, "heartbeat ok"),
							Ok(Err(reason)) => break reason,
							Err(_) => break FailureReason::Retryable(RetryableReason::Timeout),
						}
					}
				}
			};

			warn!(target = "booker.warmer", client = %id, reason = %lost, "heartbeat failed; session dropped");
			session.close().await;
			last_failure = Some(lost);
			if self.window.is_cancelled() || clock::remaining(self.clock.as_ref(), deadline).is_none() {
				status.send_replace(WarmStatus::Failed { reason: lost });
				tokio::select! {
					biased;
					_ = self.cancel.cancelled() => {}
					request = &mut claims => answer(request, Claim::Failed(lost)),
				}
				return;
			}
			status.send_replace(WarmStatus::Warming { last_failure });
		}
	}

	/// Answers the claim with `Incomplete` once it arrives.
	async fn hold_incomplete(&self, claims: oneshot::Receiver<ClaimReply>, last_failure: Option<FailureReason>) {
		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => {}
			request = claims => answer(request, Claim::Incomplete { last_failure }),
		}
	}

	/// Opens a session and runs `prepare` on it, holding one permit. Waiting
	/// for the permit counts against the same budget, which never reaches
	/// past `deadline`.
	async fn warm_once(&self, client: &Client, deadline: DateTime<Utc>) -> Result<Session, FailureReason> {
		let left = clock::remaining(self.clock.as_ref(), deadline).ok_or(TIMEOUT)?;
		let until = Instant::now() + self.warmup_timeout.min(left);

		let _permit = match timeout_at(until, self.permits.acquire()).await {
			Ok(Ok(permit)) => permit,
			Ok(Err(_)) => return Err(FailureReason::Terminal(TerminalReason::Internal)),
			Err(_) => return Err(TIMEOUT),
		};
		let mut session = timeout_at(until, Session::open(Arc::clone(&self.driver), client.id.clone(), self.headless))
			.await
			.map_err(|_| TIMEOUT)??;
		match timeout_at(until, self.portal.prepare(&mut session, client)).await {
			Ok(Ok(())) => {
				session.mark_warm();
				Ok(session)
			}
			Ok(Err(reason)) => {
				session.close().await;
				Err(reason)
			}
			Err(_) => {
				session.close().await;
				Err(TIMEOUT)
			}
		}
	}
}
