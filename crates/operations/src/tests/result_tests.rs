use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use shared::error::OperationError;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::{CancellableResult, Operation, Progress};

struct CountingOperation {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Operation for CountingOperation {
    type Output = ();

    async fn perform(self, result: CancellableResult<()>) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        result.resolve(Ok(()));
    }
}

struct WaitForCancelOperation;

#[async_trait]
impl Operation for WaitForCancelOperation {
    type Output = ();

    async fn perform(self, result: CancellableResult<()>) {
        result.cancelled().await;
        result.resolve(Err(OperationError::Cancelled));
    }
}

#[test]
fn first_resolve_wins_and_later_ones_are_noops() {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let result = CancellableResult::new(move |outcome| sink.lock().unwrap().push(outcome));

    assert!(result.resolve(Ok(())));
    assert!(!result.resolve(Err(OperationError::TimedOut)));
    assert!(!result.resolve(Ok(())));

    assert!(result.is_finished());
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(*outcomes, vec![Ok(())]);
}

#[test]
fn success_forces_progress_to_completion() {
    let result: CancellableResult<()> = CancellableResult::new(|_| {});
    assert_eq!(result.progress().fraction_completed(), 0.0);
    result.resolve(Ok(()));
    assert_eq!(result.progress().fraction_completed(), 1.0);
}

#[test]
fn failure_leaves_progress_untouched() {
    let result: CancellableResult<()> = CancellableResult::new(|_| {});
    result.resolve(Err(OperationError::TimedOut));
    assert_eq!(result.progress().completed_units(), 0);
}

#[test]
fn cancel_is_monotonic_and_does_not_resolve() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let result: CancellableResult<()> = CancellableResult::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!result.is_cancelled());
    result.cancel();
    result.cancel();
    assert!(result.is_cancelled());
    assert!(!result.is_finished());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_future_completes_after_cancel() {
    let result: CancellableResult<()> = CancellableResult::new(|_| {});
    let waiter = result.clone();
    let handle = tokio::spawn(async move { waiter.cancelled().await });

    tokio::task::yield_now().await;
    result.cancel();
    handle.await.expect("cancelled waiter");

    // Observing an already-raised flag completes immediately.
    result.cancelled().await;
}

#[tokio::test]
async fn an_operation_observing_cancellation_resolves_cancelled() {
    let (tx, rx) = oneshot::channel();
    let result = CancellableResult::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    result.start(WaitForCancelOperation);

    sleep(Duration::from_millis(10)).await;
    result.cancel();
    assert_eq!(rx.await.expect("outcome"), Err(OperationError::Cancelled));
}

#[tokio::test]
async fn a_second_start_is_ignored() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    let result = CancellableResult::new(move |outcome| {
        let _ = tx.send(outcome);
    });

    result.start(CountingOperation {
        runs: Arc::clone(&runs),
    });
    result.start(CountingOperation {
        runs: Arc::clone(&runs),
    });

    assert_eq!(rx.await.expect("outcome"), Ok(()));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn progress_units_clamp_at_the_total() {
    let progress = Progress::new(3);
    for _ in 0..5 {
        progress.complete_unit();
    }
    assert_eq!(progress.completed_units(), 3);
    assert_eq!(progress.fraction_completed(), 1.0);
}
