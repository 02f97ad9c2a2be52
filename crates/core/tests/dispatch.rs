mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use booker::plan::ConcurrencyMode;
use booker::sim::SimPortal;
use booker::{
	AbandonReason, AttemptResult, Client, ClientId, DispatchKind, FailureReason, PortalAdapter, RetryableReason, SchedulerState, Session,
	TerminalReason,
};
use chrono::Utc;
use common::{Rig, ms, plan};

#[tokio::test]
async fn sequential_run_books_two_and_abandons_the_third() {
	let rig = Rig::new(SimPortal::new());
	rig.portal.always_book("c", Err(RetryableReason::Unavailable.into()));
	let plan = plan().mode(ConcurrencyMode::Sequential).build().unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c"]).run().await;

	assert_eq!(summary.counts.succeeded, 2);
	assert_eq!(summary.counts.abandoned, 1);
	assert_eq!(summary.counts.total(), 3);
	let c = summary.client(&ClientId::new("c")).unwrap();
	assert_eq!(
		c.result,
		AttemptResult::Abandoned {
			reason: AbandonReason::MaxRetriesExceeded,
			last_failure: Some(FailureReason::Retryable(RetryableReason::Unavailable)),
		}
	);
	assert_eq!(c.attempts, 3);

	let order: Vec<String> = rig.portal.book_order().iter().map(ToString::to_string).collect();
	assert_eq!(order, ["a", "b", "c", "c", "c"]);
	assert_eq!(rig.portal.peak_concurrent_bookings(), 1);
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn past_target_skips_warmup_and_respects_cap() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(0), ms(40)));
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(2))
		.warmup(true)
		.target(Some(Utc::now() - chrono::TimeDelta::minutes(1)))
		.build()
		.unwrap();
	let scheduler = rig.scheduler(plan, &["a", "b", "c", "d", "e"]);
	let mut states = scheduler.subscribe();
	let seen = tokio::spawn(async move {
		let mut seen = vec![*states.borrow_and_update()];
		while states.changed().await.is_ok() {
			seen.push(*states.borrow_and_update());
		}
		seen
	});

	let started = Instant::now();
	let summary = scheduler.run().await;

	assert!(started.elapsed() < ms(2_000));
	assert_eq!(summary.counts.succeeded, 5);
	assert!(rig.portal.peak_concurrent_bookings() <= 2);
	assert_eq!(rig.portal.peak_concurrent_bookings(), 2);
	for report in &summary.clients {
		assert_eq!(report.dispatch, DispatchKind::Cold);
		assert!(!report.at_risk());
		assert_eq!(report.attempts, 1);
	}
	let seen = seen.await.unwrap();
	assert!(!seen.contains(&SchedulerState::Warming));
	assert_eq!(seen.last(), Some(&SchedulerState::Done));
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn parallel_dispatch_never_shares_a_client_session() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(5), ms(15)));
	for id in ["b", "d", "f"] {
		rig.portal.script_book(id, [Err(RetryableReason::Network.into()), Err(RetryableReason::Timeout.into())]);
	}
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(3))
		.warmup(true)
		.target(Some(Utc::now() + chrono::TimeDelta::milliseconds(200)))
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c", "d", "e", "f"]).run().await;

	assert_eq!(summary.counts.succeeded, 6);
	assert_eq!(rig.portal.exclusivity_violations(), 0);
	assert!(rig.portal.peak_concurrent_bookings() <= 3);
	let ids: HashSet<&ClientId> = summary.clients.iter().map(|r| &r.client_id).collect();
	assert_eq!(ids.len(), 6);
	for id in ["b", "d", "f"] {
		assert_eq!(summary.client(&ClientId::new(id)).unwrap().attempts, 3);
	}
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn terminal_failure_is_not_retried() {
	let rig = Rig::new(SimPortal::new());
	rig.portal.always_book("a", Err(TerminalReason::NoSlots.into()));
	let plan = plan().build().unwrap();

	let summary = rig.scheduler(plan, &["a", "b"]).run().await;

	let a = summary.client(&ClientId::new("a")).unwrap();
	assert_eq!(a.result, AttemptResult::FailedTerminal { reason: TerminalReason::NoSlots });
	assert_eq!(a.attempts, 1);
	assert_eq!(rig.portal.book_calls("a"), 1);
	assert_eq!(summary.counts.succeeded, 1);
}

#[tokio::test]
async fn retries_stop_at_the_cutoff() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(0), ms(10_000)));
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(1))
		.retry_budget(ms(150))
		.build()
		.unwrap();

	let started = Instant::now();
	let summary = rig.scheduler(plan, &["a", "b"]).run().await;

	assert!(started.elapsed() < ms(3_000));
	let a = summary.client(&ClientId::new("a")).unwrap();
	let b = summary.client(&ClientId::new("b")).unwrap();
	assert_eq!(a.result, AttemptResult::abandoned(AbandonReason::DeadlineExceeded));
	assert_eq!(a.attempts, 1);
	assert_eq!(b.result, AttemptResult::abandoned(AbandonReason::DeadlineExceeded));
	assert_eq!(b.dispatch, DispatchKind::NotDispatched);
	rig.assert_all_closed().await;
}

/// Delegates to a [`SimPortal`] but panics while booking one client.
struct Exploding {
	inner: SimPortal,
	victim: ClientId,
}

#[async_trait]
impl PortalAdapter for Exploding {
	async fn prepare(&self, session: &mut Session, client: &Client) -> Result<(), FailureReason> {
		self.inner.prepare(session, client).await
	}

	async fn heartbeat(&self, session: &mut Session) -> Result<(), FailureReason> {
		self.inner.heartbeat(session).await
	}

	async fn book(&self, session: &mut Session, client: &Client) -> Result<String, FailureReason> {
		if client.id == self.victim {
			panic!("portal adapter bug");
		}
		self.inner.book(session, client).await
	}
}

#[tokio::test]
async fn panicking_attempt_becomes_internal_failure() {
	let driver = Arc::new(booker::sim::SimDriver::new());
	let portal = Arc::new(Exploding {
		inner: SimPortal::new(),
		victim: ClientId::new("b"),
	});
	let plan = plan().mode(ConcurrencyMode::ParallelBounded(2)).build().unwrap();
	let scheduler = booker::ConcurrencyScheduler::new(plan, common::queue(&["a", "b", "c"]), driver.clone(), portal);

	let summary = scheduler.run().await;

	assert_eq!(summary.counts.succeeded, 2);
	assert_eq!(
		summary.client(&ClientId::new("b")).unwrap().result,
		AttemptResult::FailedTerminal { reason: TerminalReason::Internal }
	);
	for _ in 0..200 {
		if driver.open_handles() == 0 {
			break;
		}
		tokio::time::sleep(ms(5)).await;
	}
	assert_eq!(driver.open_handles(), 0);
}

#[tokio::test]
async fn empty_queue_finishes_immediately() {
	let rig = Rig::new(SimPortal::new());
	let scheduler = rig.scheduler(plan().build().unwrap(), &[]);
	let states = scheduler.subscribe();
	let summary = scheduler.run().await;
	assert!(summary.clients.is_empty());
	assert_eq!(*states.borrow(), SchedulerState::Done);
}
