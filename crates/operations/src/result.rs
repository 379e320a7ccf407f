//! Cancellable unit-of-work primitive shared by all operations.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use shared::error::OperationError;
use tokio::sync::watch;
use tracing::error;

/// Unit-based progress counter. The fraction is monotonically
/// non-decreasing; completed units feed the caller's aggregate multi-app
/// progress view.
pub struct Progress {
    total_units: u64,
    completed_units: AtomicU64,
}

impl Progress {
    pub fn new(total_units: u64) -> Self {
        Self {
            total_units: total_units.max(1),
            completed_units: AtomicU64::new(0),
        }
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn completed_units(&self) -> u64 {
        self.completed_units.load(Ordering::Acquire)
    }

    pub fn fraction_completed(&self) -> f64 {
        self.completed_units() as f64 / self.total_units as f64
    }

    /// Completes one unit, clamped at the total.
    pub fn complete_unit(&self) {
        let _ = self
            .completed_units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |completed| {
                (completed < self.total_units).then_some(completed + 1)
            });
    }

    fn complete_all(&self) {
        self.completed_units
            .fetch_max(self.total_units, Ordering::AcqRel);
    }
}

type CompletionHandler<T> = Box<dyn FnOnce(Result<T, OperationError>) + Send>;

/// A multi-step, fallible, cancellable unit of work.
///
/// The handle is cheap to clone; all clones share one terminal state. The
/// first `resolve` wins and delivers the outcome to the completion handler
/// exactly once, on whatever context the resolver ran on. Cancellation is
/// cooperative: `cancel` only raises the flag, the operation body observes
/// it and resolves with [`OperationError::Cancelled`] itself.
pub struct CancellableResult<T> {
    inner: Arc<ResultCell<T>>,
}

struct ResultCell<T> {
    started: AtomicBool,
    finished: AtomicBool,
    progress: Progress,
    completion: Mutex<Option<CompletionHandler<T>>>,
    cancel_tx: watch::Sender<bool>,
}

impl<T> Clone for CancellableResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> CancellableResult<T> {
    pub fn new(on_completion: impl FnOnce(Result<T, OperationError>) + Send + 'static) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ResultCell {
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                progress: Progress::new(1),
                completion: Mutex::new(Some(Box::new(on_completion))),
                cancel_tx,
            }),
        }
    }

    /// Spawns the operation body. At most one start is honored; a second
    /// call is a programmer error and is reported and ignored.
    pub fn start<O>(&self, operation: O)
    where
        O: Operation<Output = T>,
    {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            error!("operation: started more than once, ignoring the extra start");
            return;
        }
        let result = self.clone();
        tokio::spawn(async move { operation.perform(result).await });
    }

    /// Records the terminal outcome. The first caller wins; later calls are
    /// discarded no-ops so racing callbacks stay harmless. Success forces
    /// progress to completion.
    pub fn resolve(&self, outcome: Result<T, OperationError>) -> bool {
        if self
            .inner
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if outcome.is_ok() {
            self.inner.progress.complete_all();
        }
        let handler = self
            .inner
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            handler(outcome);
        }
        true
    }

    /// Raises the cancellation flag. Monotonic and idempotent; does not
    /// resolve the result by itself.
    pub fn cancel(&self) {
        self.inner.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn progress(&self) -> &Progress {
        &self.inner.progress
    }
}

/// An operation body runnable through [`CancellableResult::start`]. The
/// body must reach a `resolve` call on every path, including cancellation.
#[async_trait]
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    async fn perform(self, result: CancellableResult<Self::Output>);
}
