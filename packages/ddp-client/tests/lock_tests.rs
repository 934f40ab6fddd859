//! Busy reconciler behaviour against a scripted lock source.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockLockSource;
use ddp_client::{BusyOutcome, BusyReconciler, LockSet, LockedResource, PollConfig, PollerError};

const INTERVAL: Duration = Duration::from_secs(3);

fn reconciler(source: &MockLockSource, config: PollConfig) -> BusyReconciler {
    BusyReconciler::new(Arc::new(source.clone()), config)
}

#[tokio::test(start_paused = true)]
async fn stays_busy_until_every_lock_clears() {
    let source = MockLockSource::new()
        .with_resources(vec![LockedResource::locked("x"), LockedResource::unlocked("y")])
        .with_resources(vec![LockedResource::unlocked("x"), LockedResource::unlocked("y")]);

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    let mut updates = handle.updates();

    let busy = updates.wait_for(|u| u.rounds == 1).await.unwrap().clone();
    assert!(busy.busy);
    assert_eq!(busy.locked, LockSet::from(["x".to_string()]));

    assert_eq!(handle.wait().await, BusyOutcome::Idle);
    let last = updates.borrow().clone();
    assert!(!last.busy);
    assert!(last.locked.is_empty());
    assert_eq!(source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn nothing_locked_finishes_in_one_round() {
    let source = MockLockSource::new().with_resources(vec![LockedResource::unlocked("a")]);

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    assert_eq!(handle.wait().await, BusyOutcome::Idle);
    assert_eq!(source.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_error_fails_open_in_the_same_round() {
    let source = MockLockSource::new()
        .with_resources(vec![LockedResource::locked("x")])
        .with_error(PollerError::Api {
            status: 502,
            message: "bad gateway".into(),
        });

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    let updates = handle.updates();

    let outcome = handle.wait().await;
    assert!(matches!(outcome, BusyOutcome::FetchFailed(ref m) if m.contains("502")));
    assert!(!updates.borrow().busy);

    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn first_round_error_is_not_busy() {
    let source = MockLockSource::new().with_error(PollerError::Network("timed out".into()));

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    let updates = handle.updates();

    assert!(matches!(handle.wait().await, BusyOutcome::FetchFailed(_)));
    assert!(!updates.borrow().busy);
    assert_eq!(source.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_releases_busy_state() {
    let source = MockLockSource::new();

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL).max_attempts(4)).start();
    let updates = handle.updates();

    let outcome = handle.wait().await;
    assert_eq!(
        outcome,
        BusyOutcome::GaveUp {
            locked: LockSet::from(["still-running".to_string()])
        }
    );
    assert!(!updates.borrow().busy);
    assert_eq!(source.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_reconciling() {
    let source = MockLockSource::new();

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    let mut updates = handle.updates();
    updates.wait_for(|u| u.rounds == 2).await.unwrap();
    assert!(handle.is_busy());

    handle.cancel();
    assert_eq!(handle.wait().await, BusyOutcome::Cancelled);
    assert!(!updates.borrow().busy);
    assert_eq!(source.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_reconciling() {
    let source = MockLockSource::new();

    let handle = reconciler(&source, PollConfig::with_interval(INTERVAL)).start();
    let mut updates = handle.updates();
    updates.wait_for(|u| u.rounds == 1).await.unwrap();
    drop(handle);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.call_count(), 1);
    assert!(!updates.borrow().busy);
}

#[tokio::test(start_paused = true)]
async fn max_duration_releases_busy_state_at_the_deadline() {
    let source = MockLockSource::new();
    let start = tokio::time::Instant::now();

    let handle = reconciler(
        &source,
        PollConfig::with_interval(INTERVAL).max_duration(Duration::from_secs(7)),
    )
    .start();

    assert!(matches!(handle.wait().await, BusyOutcome::GaveUp { .. }));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7));
    assert!(elapsed < Duration::from_secs(8));
    // Rounds at 0s and 3s; the 6s round is followed by a 1s pause.
    assert_eq!(source.call_count(), 3);
}
