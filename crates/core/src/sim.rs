//! In-memory driver and portal.
//!
//! [`SimDriver`] hands out handles without a browser and tracks which ones
//! are still open. [`SimPortal`] plays back scripted results per client and
//! records how calls overlapped, so tests can check concurrency bounds and
//! per-client session exclusivity. `booker run --dry-run` uses both.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use booker_protocol::{Action, Client, ClientId, FailureReason, InteractOutcome};
use parking_lot::Mutex;

use crate::driver::{BrowserDriver, DriverError, DriverHandle};
use crate::portal::PortalAdapter;
use crate::session::Session;

/// Browser driver that only does bookkeeping.
#[derive(Debug, Default)]
pub struct SimDriver {
	next_id: AtomicU64,
	open: Mutex<HashSet<DriverHandle>>,
	opened_total: AtomicUsize,
	failing_opens: AtomicUsize,
}

impl SimDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next `n` `open` calls fail with a network error.
	pub fn fail_next_opens(&self, n: usize) {
		self.failing_opens.store(n, Ordering::SeqCst);
	}

	/// Handles opened and not yet closed.
	pub fn open_handles(&self) -> usize {
		self.open.lock().len()
	}

	pub fn opened_total(&self) -> usize {
		self.opened_total.load(Ordering::SeqCst)
	}

	fn ensure_open(&self, handle: &DriverHandle) -> Result<(), DriverError> {
		if self.open.lock().contains(handle) {
			Ok(())
		} else {
			Err(DriverError::Closed(handle.to_string()))
		}
	}
}

#[async_trait]
impl BrowserDriver for SimDriver {
	async fn open(&self, _headless: bool) -> Result<DriverHandle, DriverError> {
		let failing = self
			.failing_opens
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			return Err(DriverError::Network("simulated launch failure".into()));
		}
		let handle = DriverHandle::new(format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
		self.open.lock().insert(handle.clone());
		self.opened_total.fetch_add(1, Ordering::SeqCst);
		Ok(handle)
	}

	async fn navigate(&self, handle: &DriverHandle, _url: &str) -> Result<(), DriverError> {
		self.ensure_open(handle)
	}

	async fn interact(&self, handle: &DriverHandle, action: &Action) -> Result<InteractOutcome, DriverError> {
		self.ensure_open(handle)?;
		Ok(match action {
			Action::PageSource => InteractOutcome::Text {
				value: "<html><body>simulated portal</body></html>".into(),
			},
			Action::CurrentUrl => InteractOutcome::Text {
				value: "sim://portal".into(),
			},
			_ => InteractOutcome::Done,
		})
	}

	async fn close(&self, handle: DriverHandle) -> Result<(), DriverError> {
		self.open.lock().remove(&handle);
		Ok(())
	}
}

#[derive(Debug, Default)]
struct Script {
	prepare: VecDeque<Result<(), FailureReason>>,
	prepare_default: Option<Result<(), FailureReason>>,
	book: VecDeque<Result<String, FailureReason>>,
	book_default: Option<Result<String, FailureReason>>,
	heartbeat: VecDeque<Result<(), FailureReason>>,
	prepare_calls: usize,
	book_calls: usize,
	heartbeat_calls: usize,
}

#[derive(Debug, Default)]
struct Activity {
	/// Clients with a prepare or book call in progress.
	busy: HashSet<ClientId>,
	overlaps: usize,
	preparing_now: usize,
	prepare_peak: usize,
	booking_now: usize,
	booking_peak: usize,
	book_order: Vec<ClientId>,
}

/// Portal that plays back scripted results.
///
/// Unscripted calls succeed: `prepare` returns `Ok`, `book` returns a
/// reference derived from the client id.
#[derive(Debug, Default)]
pub struct SimPortal {
	scripts: Mutex<HashMap<ClientId, Script>>,
	activity: Mutex<Activity>,
	prepare_delay: Mutex<Duration>,
	book_delay: Mutex<Duration>,
}

impl SimPortal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_delays(self, prepare: Duration, book: Duration) -> Self {
		*self.prepare_delay.lock() = prepare;
		*self.book_delay.lock() = book;
		self
	}

	/// Queues results for successive `prepare` calls of `client`.
	pub fn script_prepare(&self, client: &str, results: impl IntoIterator<Item = Result<(), FailureReason>>) {
		self.script(client, |s| s.prepare.extend(results));
	}

	/// Result for every `prepare` call of `client` once its queue is empty.
	pub fn always_prepare(&self, client: &str, result: Result<(), FailureReason>) {
		self.script(client, |s| s.prepare_default = Some(result));
	}

	/// Queues results for successive `book` calls of `client`.
	pub fn script_book(&self, client: &str, results: impl IntoIterator<Item = Result<String, FailureReason>>) {
		self.script(client, |s| s.book.extend(results));
	}

	/// Result for every `book` call of `client` once its queue is empty.
	pub fn always_book(&self, client: &str, result: Result<String, FailureReason>) {
		self.script(client, |s| s.book_default = Some(result));
	}

	/// Queues results for successive heartbeats of `client`.
	pub fn script_heartbeat(&self, client: &str, results: impl IntoIterator<Item = Result<(), FailureReason>>) {
		self.script(client, |s| s.heartbeat.extend(results));
	}

	fn script(&self, client: &str, f: impl FnOnce(&mut Script)) {
		f(self.scripts.lock().entry(ClientId::new(client)).or_default());
	}

	pub fn prepare_calls(&self, client: &str) -> usize {
		self.scripts.lock().get(&ClientId::new(client)).map_or(0, |s| s.prepare_calls)
	}

	pub fn book_calls(&self, client: &str) -> usize {
		self.scripts.lock().get(&ClientId::new(client)).map_or(0, |s| s.book_calls)
	}

	pub fn heartbeat_calls(&self, client: &str) -> usize {
		self.scripts.lock().get(&ClientId::new(client)).map_or(0, |s| s.heartbeat_calls)
	}

	/// Highest number of `book` calls observed in progress at once.
	pub fn peak_concurrent_bookings(&self) -> usize {
		self.activity.lock().booking_peak
	}

	/// Highest number of `prepare` calls observed in progress at once.
	pub fn peak_concurrent_prepares(&self) -> usize {
		self.activity.lock().prepare_peak
	}

	/// Times a client had two portal calls in progress at once.
	pub fn exclusivity_violations(&self) -> usize {
		self.activity.lock().overlaps
	}

	/// Clients in the order their `book` calls started.
	pub fn book_order(&self) -> Vec<ClientId> {
		self.activity.lock().book_order.clone()
	}

	fn enter(&self, client: &ClientId, booking: bool) -> ActivityGuard<'_> {
		let mut activity = self.activity.lock();
		if !activity.busy.insert(client.clone()) {
			activity.overlaps += 1;
		}
		if booking {
			activity.booking_now += 1;
			activity.booking_peak = activity.booking_peak.max(activity.booking_now);
			activity.book_order.push(client.clone());
		} else {
			activity.preparing_now += 1;
			activity.prepare_peak = activity.prepare_peak.max(activity.preparing_now);
		}
		ActivityGuard {
			portal: self,
			client: client.clone(),
			booking,
		}
	}
}

/// Clears a client's busy mark when a portal call ends or is dropped.
struct ActivityGuard<'a> {
	portal: &'a SimPortal,
	client: ClientId,
	booking: bool,
}

impl Drop for ActivityGuard<'_> {
	fn drop(&mut self) {
		let mut activity = self.portal.activity.lock();
		activity.busy.remove(&self.client);
		if self.booking {
			activity.booking_now -= 1;
		} else {
			activity.preparing_now -= 1;
		}
	}
}

#[async_trait]
impl PortalAdapter for SimPortal {
	async fn prepare(&self, session: &mut Session, client: &Client) -> Result<(), FailureReason> {
		let _guard = self.enter(&client.id, false);
		let result = {
			let mut scripts = self.scripts.lock();
			let script = scripts.entry(client.id.clone()).or_default();
			script.prepare_calls += 1;
			script.prepare.pop_front().or(script.prepare_default).unwrap_or(Ok(()))
		};
		let delay = *self.prepare_delay.lock();
		session.navigate("sim://portal/login").await?;
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		result
	}

	async fn heartbeat(&self, session: &mut Session) -> Result<(), FailureReason> {
		let result = {
			let mut scripts = self.scripts.lock();
			let script = scripts.entry(session.client_id().clone()).or_default();
			script.heartbeat_calls += 1;
			script.heartbeat.pop_front().unwrap_or(Ok(()))
		};
		session.interact(&Action::CurrentUrl).await?;
		result
	}

	async fn book(&self, session: &mut Session, client: &Client) -> Result<String, FailureReason> {
		let _guard = self.enter(&client.id, true);
		let result = {
			let mut scripts = self.scripts.lock();
			let script = scripts.entry(client.id.clone()).or_default();
			script.book_calls += 1;
			let n = script.book_calls;
			script
				.book
				.pop_front()
				.or_else(|| script.book_default.clone())
				.unwrap_or_else(|| Ok(format!("SIM-{}-{n}", client.id)))
		};
		let delay = *self.book_delay.lock();
		session.interact(&Action::PageSource).await?;
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		result
	}
}
