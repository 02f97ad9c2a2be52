//! Run orchestration: warmup timing, bounded dispatch, retries and draining.
//!
//! The scheduler moves through
//! `Idle → Warming → ArmedWaiting → Dispatching → Draining → Done` and
//! publishes every transition on a `watch` channel.
//!
//! During dispatch each client index lives in exactly one of: the fresh
//! queue, the due-retry heap, the backoff list, the in-flight set, or the
//! finished results. Attempts run as tasks holding an owned permit from the
//! shared semaphore, so the cap also covers warm calls and a permit is
//! released on every exit path of a task, panics included.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use booker_protocol::{
	AbandonReason, AttemptResult, Client, ClientReport, DispatchKind, FailureReason, OutcomeCounts, RunSummary, TerminalReason,
};
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{self, SharedClock, SystemClock, WaitOutcome};
use crate::driver::BrowserDriver;
use crate::executor::AttemptExecutor;
use crate::plan::{ColdDispatchPolicy, RunPlan};
use crate::portal::PortalAdapter;
use crate::queue::ClientQueue;
use crate::report::Reporter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::warmer::{Claim, WarmTicket, Warmer};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
	Idle,
	Warming,
	ArmedWaiting,
	Dispatching,
	Draining,
	Done,
}

impl fmt::Display for SchedulerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SchedulerState::Idle => "idle",
			SchedulerState::Warming => "warming",
			SchedulerState::ArmedWaiting => "armed_waiting",
			SchedulerState::Dispatching => "dispatching",
			SchedulerState::Draining => "draining",
			SchedulerState::Done => "done",
		};
		f.write_str(name)
	}
}

/// Per-client bookkeeping for one run.
struct Slot {
	client: Arc<Client>,
	ticket: Option<WarmTicket>,
	attempts: u32,
	dispatch: DispatchKind,
	warmup_failure: Option<FailureReason>,
	last_failure: Option<FailureReason>,
	first_dispatched: Option<Instant>,
	finished_at: Option<Instant>,
	result: Option<AttemptResult>,
}

impl Slot {
	fn new(client: Arc<Client>) -> Self {
		Self {
			client,
			ticket: None,
			attempts: 0,
			dispatch: DispatchKind::NotDispatched,
			warmup_failure: None,
			last_failure: None,
			first_dispatched: None,
			finished_at: None,
			result: None,
		}
	}

	fn finish(&mut self, result: AttemptResult) {
		debug_assert!(self.result.is_none(), "client finished twice");
		info!(target = "booker.scheduler", client = %self.client.id, attempts = self.attempts, %result, "client finished");
		self.finished_at = Some(Instant::now());
		self.result = Some(result);
	}

	fn abandon(&mut self, reason: AbandonReason) {
		self.finish(AttemptResult::Abandoned {
			reason,
			last_failure: self.last_failure,
		});
	}

	fn report(self) -> ClientReport {
		let elapsed_ms = match (self.first_dispatched, self.finished_at) {
			(Some(start), Some(end)) => end.saturating_duration_since(start).as_millis() as u64,
			_ => 0,
		};
		ClientReport {
			client_id: self.client.id.clone(),
			name: self.client.display_name(),
			result: self.result.unwrap_or(AttemptResult::Abandoned {
				reason: AbandonReason::Cancelled,
				last_failure: self.last_failure,
			}),
			attempts: self.attempts,
			dispatch: self.dispatch,
			warmup_failure: self.warmup_failure,
			elapsed_ms,
		}
	}
}

/// What an attempt task hands back.
struct TaskReport {
	idx: usize,
	/// `None` when the task ended before the attempt itself started.
	first_dispatch: Option<DispatchKind>,
	warmup_failure: Option<FailureReason>,
	attempted: bool,
	result: AttemptResult,
}

/// State shared with every attempt task.
struct Dispatcher {
	executor: AttemptExecutor,
	cold_dispatch: ColdDispatchPolicy,
	abort: CancellationToken,
}

impl Dispatcher {
	async fn run(self: Arc<Self>, idx: usize, client: Arc<Client>, ticket: Option<WarmTicket>, first: bool) -> TaskReport {
		let mut report = TaskReport {
			idx,
			first_dispatch: None,
			warmup_failure: None,
			attempted: true,
			result: AttemptResult::abandoned(AbandonReason::Cancelled),
		};

		let claimed = match ticket {
			Some(ticket) => match ticket.claim().await {
				Claim::Ready(session) => Some(session),
				claim => {
					report.warmup_failure = claim.warmup_failure();
					if self.cold_dispatch == ColdDispatchPolicy::Refuse {
						warn!(target = "booker.scheduler", client = %client.id, "warmup incomplete and cold dispatch refused");
						report.attempted = false;
						report.first_dispatch = Some(DispatchKind::NotDispatched);
						report.result = AttemptResult::FailedTerminal {
							reason: TerminalReason::WarmupFailed,
						};
						return report;
					}
					warn!(target = "booker.scheduler", client = %client.id, warmup_failure = ?report.warmup_failure, "dispatching cold; client at risk");
					report.first_dispatch = Some(DispatchKind::ColdAtRisk);
					None
				}
			},
			None => None,
		};

		report.result = match claimed {
			Some(session) => {
				report.first_dispatch = Some(DispatchKind::Warm);
				self.executor.attempt(session, &client, &self.abort).await
			}
			None => {
				if first && report.first_dispatch.is_none() {
					report.first_dispatch = Some(DispatchKind::Cold);
				}
				self.executor.attempt_cold(&client, &self.abort).await
			}
		};
		report
	}
}

/// Drives one run over a loaded queue.
pub struct ConcurrencyScheduler {
	plan: RunPlan,
	queue: ClientQueue,
	driver: Arc<dyn BrowserDriver>,
	portal: Arc<dyn PortalAdapter>,
	clock: SharedClock,
	cancel: CancellationToken,
	state: watch::Sender<SchedulerState>,
}

impl ConcurrencyScheduler {
	pub fn new(plan: RunPlan, queue: ClientQueue, driver: Arc<dyn BrowserDriver>, portal: Arc<dyn PortalAdapter>) -> Self {
		let (state, _) = watch::channel(SchedulerState::Idle);
		Self {
			plan,
			queue,
			driver,
			portal,
			clock: Arc::new(SystemClock),
			cancel: CancellationToken::new(),
			state,
		}
	}

	pub fn with_clock(mut self, clock: SharedClock) -> Self {
		self.clock = clock;
		self
	}

	/// Token that cancels the run from any state.
	pub fn cancel_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
		self.state.subscribe()
	}

	pub fn state(&self) -> SchedulerState {
		*self.state.borrow()
	}

	pub fn plan(&self) -> &RunPlan {
		&self.plan
	}

	fn enter(&self, next: SchedulerState) {
		let prev = self.state.send_replace(next);
		if prev != next {
			info!(target = "booker.scheduler", from = %prev, to = %next, "state change");
		}
	}

	/// Runs to `Done` and hands the summary to `reporter`. Reporter errors are
	/// logged.
	pub async fn run_reported(self, reporter: &dyn Reporter) -> RunSummary {
		let summary = self.run().await;
		if let Err(err) = reporter.report(&summary).await {
			error!(target = "booker.scheduler", error = %err, "failed to report run summary");
		}
		summary
	}

	/// Runs to `Done`. Every client in the queue gets exactly one terminal
	/// result.
	pub async fn run(self) -> RunSummary {
		let started_at = self.clock.now();
		let started = Instant::now();
		let mut slots: Vec<Slot> = self.queue.clients().iter().cloned().map(Slot::new).collect();
		info!(
			target = "booker.scheduler",
			clients = slots.len(),
			mode = %self.plan.mode,
			warmup = self.plan.warmup,
			target_time = ?self.plan.target,
			"run starting"
		);

		let permits = Arc::new(Semaphore::new(self.plan.mode.cap()));
		let retry = RetryPolicy::with_clock(self.plan.retry.clone(), Arc::clone(&self.clock));
		let warm_cancel = self.cancel.child_token();
		let warmer = Warmer::new(
			Arc::clone(&self.driver),
			Arc::clone(&self.portal),
			Arc::clone(&permits),
			retry.clone(),
			&self.plan,
			Arc::clone(&self.clock),
			warm_cancel.clone(),
		);

		let armed = !slots.is_empty() && self.prepare_window(&warmer, &mut slots).await;
		if armed {
			let window_open = self.plan.window_open(self.clock.now());
			let cutoff = self.plan.cutoff(window_open);
			info!(target = "booker.scheduler", %window_open, %cutoff, "window open; dispatching");
			self.enter(SchedulerState::Dispatching);
			self.dispatch(&mut slots, permits, retry.with_cutoff(cutoff), cutoff).await;
		} else {
			self.enter(SchedulerState::Draining);
			for slot in slots.iter_mut().filter(|slot| slot.result.is_none()) {
				slot.abandon(AbandonReason::Cancelled);
			}
		}

		warmer.shutdown();
		for slot in &mut slots {
			if let Some(ticket) = slot.ticket.take() {
				ticket.release().await;
			}
		}

		let clients: Vec<ClientReport> = slots.into_iter().map(Slot::report).collect();
		let counts = OutcomeCounts::tally(clients.iter().map(|report| &report.result));
		self.enter(SchedulerState::Done);
		info!(
			target = "booker.scheduler",
			succeeded = counts.succeeded,
			failed = counts.failed_terminal,
			abandoned = counts.abandoned,
			"run done"
		);
		RunSummary {
			started_at,
			finished_at: self.clock.now(),
			elapsed_ms: started.elapsed().as_millis() as u64,
			counts,
			clients,
			load_warnings: self.queue.warnings().iter().map(ToString::to_string).collect(),
		}
	}

	/// Idle, Warming and ArmedWaiting. Returns `false` if cancelled first.
	async fn prepare_window(&self, warmer: &Warmer, slots: &mut [Slot]) -> bool {
		let now = self.clock.now();
		let target_passed = self.plan.target.is_some_and(|target| target <= now);
		if self.plan.warmup && target_passed {
			info!(target = "booker.scheduler", "target already passed; skipping warmup");
		}

		if self.plan.warmup && !target_passed {
			if let Some(warm_start) = self.plan.warm_start() {
				debug!(target = "booker.scheduler", %warm_start, "idle until warm start");
				if clock::sleep_until(self.clock.as_ref(), warm_start, &self.cancel).await == WaitOutcome::Cancelled {
					return false;
				}
			}

			self.enter(SchedulerState::Warming);
			let warm_deadline = self.plan.target.unwrap_or_else(|| self.warm_deadline_without_target());
			let mut watchers = Vec::with_capacity(slots.len());
			for slot in slots.iter_mut() {
				let ticket = warmer.spawn(Arc::clone(&slot.client), warm_deadline);
				watchers.push(ticket.watch());
				slot.ticket = Some(ticket);
			}
			let all_settled = async move {
				for mut watcher in watchers {
					let _ = watcher.wait_for(|status| status.is_settled()).await;
				}
			};
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return false,
				_ = all_settled => debug!(target = "booker.scheduler", "all warm tickets settled"),
				_ = clock::sleep_until(self.clock.as_ref(), warm_deadline, &self.cancel) => {
					warn!(target = "booker.scheduler", "warm deadline reached with tickets still warming");
				}
			}
		}

		self.enter(SchedulerState::ArmedWaiting);
		if let Some(target) = self.plan.target {
			if clock::sleep_until(self.clock.as_ref(), target, &self.cancel).await == WaitOutcome::Cancelled {
				return false;
			}
		}
		// Unfinished warmups must not compete with dispatch for permits.
		warmer.close_window();
		!self.cancel.is_cancelled()
	}

	fn warm_deadline_without_target(&self) -> DateTime<Utc> {
		let now = self.clock.now();
		chrono::TimeDelta::from_std(self.plan.warmup_timeout)
			.ok()
			.and_then(|timeout| now.checked_add_signed(timeout))
			.unwrap_or(now)
	}

	/// Dispatching and Draining.
	async fn dispatch(&self, slots: &mut [Slot], permits: Arc<Semaphore>, retry: RetryPolicy, cutoff: DateTime<Utc>) {
		let sequential = self.plan.mode.is_sequential();
		let dispatcher = Arc::new(Dispatcher {
			executor: AttemptExecutor::new(Arc::clone(&self.driver), Arc::clone(&self.portal), &self.plan),
			cold_dispatch: self.plan.cold_dispatch,
			abort: CancellationToken::new(),
		});

		let mut fresh: VecDeque<usize> = (0..slots.len()).collect();
		let mut due: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
		let mut backoff: Vec<(tokio::time::Instant, usize)> = Vec::new();
		let mut in_flight: HashSet<usize> = HashSet::new();
		let mut tasks: JoinSet<(usize, Result<TaskReport, tokio::task::JoinError>)> = JoinSet::new();

		let mut held: Option<OwnedSemaphorePermit> = None;
		let mut stop: Option<AbandonReason> = None;
		let mut grace_until: Option<tokio::time::Instant> = None;
		let mut draining = false;

		let cutoff_never = CancellationToken::new();
		let cutoff_wait = clock::sleep_until(self.clock.as_ref(), cutoff, &cutoff_never);
		tokio::pin!(cutoff_wait);
		let mut cutoff_hit = false;

		loop {
			let now = tokio::time::Instant::now();
			backoff.retain(|&(at, idx)| {
				if at <= now {
					due.push(Reverse(idx));
					false
				} else {
					true
				}
			});

			if stop.is_none() {
				loop {
					let admit_fresh = !sequential || (in_flight.is_empty() && backoff.is_empty() && due.is_empty());
					let next_retry = due.peek().map(|Reverse(idx)| *idx);
					let next_fresh = fresh.front().copied().filter(|_| admit_fresh);
					let from_retry = match (next_retry, next_fresh) {
						(Some(r), Some(f)) => r < f,
						(Some(_), None) => true,
						(None, Some(_)) => false,
						(None, None) => break,
					};
					let permit = match held.take() {
						Some(permit) => permit,
						None => match Arc::clone(&permits).try_acquire_owned() {
							Ok(permit) => permit,
							Err(_) => break,
						},
					};
					let idx = if from_retry { due.pop().map(|Reverse(idx)| idx) } else { fresh.pop_front() };
					let Some(idx) = idx else {
						held = Some(permit);
						break;
					};

					let slot = &mut slots[idx];
					let first = slot.attempts == 0 && slot.first_dispatched.is_none();
					if first {
						slot.first_dispatched = Some(Instant::now());
					}
					let ticket = slot.ticket.take();
					debug!(target = "booker.scheduler", client = %slot.client.id, attempt = slot.attempts + 1, retry = from_retry, "dispatching");
					in_flight.insert(idx);
					let inner = Arc::clone(&dispatcher).run(idx, Arc::clone(&slot.client), ticket, first);
					tasks.spawn(async move {
						let _permit = permit;
						(idx, tokio::spawn(inner).await)
					});
				}

				if fresh.is_empty() && !draining {
					draining = true;
					self.enter(SchedulerState::Draining);
				}
			}

			if in_flight.is_empty() && (stop.is_some() || (fresh.is_empty() && due.is_empty() && backoff.is_empty())) {
				break;
			}

			let ready_waiting = !due.is_empty() || (!fresh.is_empty() && (!sequential || (in_flight.is_empty() && backoff.is_empty())));
			let next_backoff = backoff.iter().map(|(at, _)| *at).min();
			let abort = &dispatcher.abort;

			tokio::select! {
				biased;
				_ = self.cancel.cancelled(), if stop.is_none() => {
					warn!(target = "booker.scheduler", in_flight = in_flight.len(), "run cancelled; draining");
					stop = Some(AbandonReason::Cancelled);
					if !draining {
						draining = true;
						self.enter(SchedulerState::Draining);
					}
					abandon_waiting(slots, &mut fresh, &mut due, &mut backoff, AbandonReason::Cancelled);
					grace_until = Some(tokio::time::Instant::now() + self.plan.cancel_grace);
					held = None;
				}
				_ = &mut cutoff_wait, if !cutoff_hit => {
					cutoff_hit = true;
					if stop.is_none() {
						warn!(target = "booker.scheduler", in_flight = in_flight.len(), "retry cutoff reached; aborting");
						stop = Some(AbandonReason::DeadlineExceeded);
						if !draining {
							draining = true;
							self.enter(SchedulerState::Draining);
						}
						abandon_waiting(slots, &mut fresh, &mut due, &mut backoff, AbandonReason::DeadlineExceeded);
						abort.cancel();
						held = None;
					}
				}
				_ = tokio::time::sleep_until(grace_until.unwrap_or_else(tokio::time::Instant::now)), if grace_until.is_some() && !abort.is_cancelled() => {
					warn!(target = "booker.scheduler", in_flight = in_flight.len(), "cancel grace elapsed; aborting in-flight attempts");
					abort.cancel();
				}
				Some(joined) = tasks.join_next() => {
					let (idx, outcome) = match joined {
						Ok(pair) => pair,
						Err(err) => {
							// The wrapper never panics; its permit is already released.
							error!(target = "booker.scheduler", error = %err, "attempt wrapper failed");
							continue;
						}
					};
					in_flight.remove(&idx);
					let report = outcome.unwrap_or_else(|err| {
						error!(target = "booker.scheduler", client = %slots[idx].client.id, error = %err, "attempt task panicked");
						TaskReport {
							idx,
							first_dispatch: None,
							warmup_failure: None,
							attempted: true,
							result: AttemptResult::FailedTerminal { reason: TerminalReason::Internal },
						}
					});
					self.settle(&mut slots[report.idx], report, &retry, stop, abort.is_cancelled(), &mut backoff);
				}
				permit = Arc::clone(&permits).acquire_owned(), if ready_waiting && held.is_none() && stop.is_none() => {
					held = permit.ok();
				}
				_ = tokio::time::sleep_until(next_backoff.unwrap_or_else(tokio::time::Instant::now)), if next_backoff.is_some() => {}
			}
		}
	}

	/// Applies one finished attempt to its slot.
	fn settle(
		&self,
		slot: &mut Slot,
		report: TaskReport,
		retry: &RetryPolicy,
		stop: Option<AbandonReason>,
		aborted: bool,
		backoff: &mut Vec<(tokio::time::Instant, usize)>,
	) {
		if let Some(kind) = report.first_dispatch {
			slot.dispatch = kind;
		}
		if report.warmup_failure.is_some() {
			slot.warmup_failure = report.warmup_failure;
		}
		if report.attempted {
			slot.attempts += 1;
		}

		match report.result {
			AttemptResult::Abandoned {
				reason: AbandonReason::Cancelled,
				..
			} if aborted => slot.abandon(stop.unwrap_or(AbandonReason::Cancelled)),
			AttemptResult::FailedRetryable { reason } => {
				let failure = FailureReason::Retryable(reason);
				slot.last_failure = Some(failure);
				if let Some(stop) = stop {
					slot.abandon(stop);
					return;
				}
				match retry.should_retry(slot.attempts, &failure) {
					RetryDecision::Retry { after } => {
						info!(target = "booker.scheduler", client = %slot.client.id, attempts = slot.attempts, %failure, delay_ms = after.as_millis() as u64, "retry scheduled");
						backoff.push((tokio::time::Instant::now() + after, report.idx));
					}
					RetryDecision::Abandon { reason } => slot.abandon(reason),
					RetryDecision::Stop => slot.finish(AttemptResult::failed(failure)),
				}
			}
			AttemptResult::FailedTerminal { reason } => {
				slot.last_failure = Some(FailureReason::Terminal(reason));
				slot.finish(AttemptResult::FailedTerminal { reason });
			}
			other => slot.finish(other),
		}
	}
}

/// Abandons every client that is not in flight and not yet finished.
fn abandon_waiting(
	slots: &mut [Slot],
	fresh: &mut VecDeque<usize>,
	due: &mut BinaryHeap<Reverse<usize>>,
	backoff: &mut Vec<(tokio::time::Instant, usize)>,
	reason: AbandonReason,
) {
	let waiting = fresh.drain(..).chain(due.drain().map(|Reverse(idx)| idx)).chain(backoff.drain(..).map(|(_, idx)| idx));
	for idx in waiting {
		slots[idx].abandon(reason);
	}
}
