mod common;

use std::time::Duration;

use booker::plan::{ColdDispatchPolicy, ConcurrencyMode};
use booker::sim::SimPortal;
use booker::{AttemptResult, ClientId, DispatchKind, FailureReason, RetryableReason, SchedulerState, TerminalReason};
use chrono::Utc;
use common::{Rig, ms, plan};

fn soon(millis: i64) -> Option<chrono::DateTime<Utc>> {
	Some(Utc::now() + chrono::TimeDelta::milliseconds(millis))
}

#[tokio::test]
async fn warm_sessions_are_used_at_window_open() {
	let rig = Rig::new(SimPortal::new());
	let target = soon(300);
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(2))
		.warmup(true)
		.warmup_lead(Duration::from_secs(60))
		.target(target)
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c"]).run().await;

	assert_eq!(summary.counts.succeeded, 3);
	for report in &summary.clients {
		assert_eq!(report.dispatch, DispatchKind::Warm);
		assert_eq!(report.warmup_failure, None);
	}
	// Prepared once while warming, never again during the attempt.
	for id in ["a", "b", "c"] {
		assert_eq!(rig.portal.prepare_calls(id), 1);
	}
	assert_eq!(rig.portal.book_calls("a"), 1);
	assert!(Utc::now() >= target.unwrap());
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn unsolvable_warmup_dispatches_cold_and_flags_at_risk() {
	let rig = Rig::new(SimPortal::new());
	rig.portal.script_prepare("b", [Err(TerminalReason::ChallengeUnsolvable.into())]);
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(3))
		.warmup(true)
		.target(soon(250))
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c"]).run().await;

	let b = summary.client(&ClientId::new("b")).unwrap();
	assert_eq!(b.dispatch, DispatchKind::ColdAtRisk);
	assert!(b.at_risk());
	assert_eq!(b.warmup_failure, Some(FailureReason::Terminal(TerminalReason::ChallengeUnsolvable)));
	assert!(b.result.is_success());
	// Warmup prepare, then the cold attempt's own prepare.
	assert_eq!(rig.portal.prepare_calls("b"), 2);

	for id in ["a", "c"] {
		let report = summary.client(&ClientId::new(id)).unwrap();
		assert_eq!(report.dispatch, DispatchKind::Warm);
		assert!(!report.at_risk());
	}
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn refused_cold_dispatch_ends_with_warmup_failed() {
	let rig = Rig::new(SimPortal::new());
	rig.portal.always_prepare("b", Err(TerminalReason::ChallengeUnsolvable.into()));
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(2))
		.warmup(true)
		.target(soon(200))
		.cold_dispatch(ColdDispatchPolicy::Refuse)
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b"]).run().await;

	let b = summary.client(&ClientId::new("b")).unwrap();
	assert_eq!(
		b.result,
		AttemptResult::FailedTerminal {
			reason: TerminalReason::WarmupFailed
		}
	);
	assert_eq!(b.dispatch, DispatchKind::NotDispatched);
	assert_eq!(b.attempts, 0);
	assert_eq!(rig.portal.book_calls("b"), 0);
	assert!(summary.client(&ClientId::new("a")).unwrap().result.is_success());
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn warm_retry_past_the_window_goes_cold() {
	// The warm retry would start after the window opens, so warmup gives up.
	let rig = Rig::new(SimPortal::new());
	rig.portal.script_prepare("a", [Err(RetryableReason::Challenge.into()); 2]);
	let plan = plan()
		.mode(ConcurrencyMode::Sequential)
		.warmup(true)
		.target(soon(150))
		.retry(booker::plan::RetryConfig {
			max_attempts: 5,
			base_delay: ms(400),
			max_delay: ms(400),
			jitter: 0.0,
			seed: Some(3),
		})
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a"]).run().await;

	let a = &summary.clients[0];
	assert_eq!(a.dispatch, DispatchKind::ColdAtRisk);
	assert_eq!(a.warmup_failure, Some(FailureReason::Retryable(RetryableReason::Challenge)));
	// Cold attempt hit the second scripted challenge, then retried.
	assert!(a.result.is_success());
	assert_eq!(a.attempts, 2);
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn warmup_without_target_is_bounded() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(10), ms(0)));
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(2))
		.warmup(true)
		.warmup_timeout(Duration::from_secs(2))
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c"]).run().await;

	assert_eq!(summary.counts.succeeded, 3);
	assert!(summary.clients.iter().all(|r| r.dispatch == DispatchKind::Warm));
	assert!(summary.elapsed_ms < 2_000);
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn warm_calls_share_the_dispatch_cap() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(40), ms(20)));
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(2))
		.warmup(true)
		.warmup_lead(Duration::from_secs(60))
		.target(soon(600))
		.build()
		.unwrap();

	let summary = rig.scheduler(plan, &["a", "b", "c", "d", "e"]).run().await;

	assert_eq!(summary.counts.succeeded, 5);
	assert!(summary.clients.iter().all(|r| r.dispatch == DispatchKind::Warm));
	assert_eq!(rig.portal.peak_concurrent_prepares(), 2);
	assert!(rig.portal.peak_concurrent_bookings() <= 2);
	assert_eq!(rig.portal.exclusivity_violations(), 0);
	rig.assert_all_closed().await;
}

#[tokio::test]
async fn unfinished_warmups_do_not_hold_back_dispatch() {
	let rig = Rig::new(SimPortal::new().with_delays(ms(1_000), ms(0)));
	let target = soon(300).unwrap();
	let plan = plan()
		.mode(ConcurrencyMode::ParallelBounded(1))
		.warmup(true)
		.warmup_lead(Duration::from_secs(60))
		.warmup_timeout(Duration::from_secs(10))
		.target(Some(target))
		.build()
		.unwrap();
	let scheduler = rig.scheduler(plan, &["a", "b"]);
	let mut states = scheduler.subscribe();
	let run = tokio::spawn(scheduler.run());

	states.wait_for(|s| *s == SchedulerState::Dispatching).await.unwrap();
	let late = Utc::now() - target;
	assert!(late < chrono::TimeDelta::milliseconds(200), "dispatch began {late} after the window");

	// a's cold prepare takes one prepare cycle; a queued warmup would add a second.
	let mut first_book = None;
	for _ in 0..400 {
		if rig.portal.book_calls("a") + rig.portal.book_calls("b") > 0 {
			first_book = Some(Utc::now() - target);
			break;
		}
		tokio::time::sleep(ms(5)).await;
	}
	let first_book = first_book.expect("no booking started");
	assert!(first_book < chrono::TimeDelta::milliseconds(1_600), "first booking began {first_book} after the window");

	let summary = run.await.unwrap();
	assert_eq!(summary.counts.succeeded, 2);
	for report in &summary.clients {
		assert_eq!(report.dispatch, DispatchKind::ColdAtRisk);
		assert!(report.at_risk());
		assert_eq!(report.warmup_failure, Some(FailureReason::Retryable(RetryableReason::Timeout)));
	}
	// b never got a permit before the window, so its only prepare is the cold one.
	assert_eq!(rig.portal.prepare_calls("b"), 1);
	rig.assert_all_closed().await;
}
