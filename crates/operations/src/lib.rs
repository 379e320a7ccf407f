//! Asynchronous operation framework and the cross-app backup handoff.
//!
//! [`BackupAppOperation`] hands control to a cooperating sideloaded app via
//! a URL open, waits for the platform to return control to the host, and
//! resolves with whatever the external app reported, or with a timeout if
//! it never reports. The launcher, the persistent store, and event delivery
//! sit behind traits so the state machine is testable on its own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use eventbus::Topic;
use shared::{
    domain::{BackupAction, InstalledApp},
    error::OperationError,
    protocol::{self, BackupResponse},
};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

mod result;

pub use result::{CancellableResult, Operation, Progress};

/// Settle time before handing control away, so a prior UI transition can
/// finish first.
const LAUNCH_DELAY: Duration = Duration::from_millis(500);
/// A launch rejected faster than this cannot have been declined by a human;
/// the external app was likely still finishing a previous step.
const FAST_FAIL_THRESHOLD: Duration = Duration::from_millis(500);
const RETRY_DELAY: Duration = Duration::from_secs(2);
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(5);
/// Extra margin so a response already in flight while the app was
/// backgrounded does not lose to the timer.
const COMPLETION_SETTLE_DELAY: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 64;

/// Process-wide event channels the handoff listens on.
pub struct AppEvents {
    /// Platform "application will enter foreground" signal. Payload unused.
    pub app_will_enter_foreground: Topic<()>,
    /// Posted by the inbound-URL handler once an external app reports a
    /// backup or restore result.
    pub backup_response: Topic<BackupResponse>,
}

impl AppEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            app_will_enter_foreground: Topic::new(EVENT_CAPACITY),
            backup_response: Topic::new(EVENT_CAPACITY),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchAttempt {
    pub accepted: bool,
    pub elapsed: Duration,
}

/// Opens an external URL and reports whether the target accepted the launch
/// and how long that determination took.
#[async_trait]
pub trait ExternalLauncher: Send + Sync {
    async fn open(&self, url: &Url) -> LaunchAttempt;
}

/// Lookup into the persistent store of installed apps. May run on a worker
/// context.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// The host app's own record, used to build the return address.
    async fn host_app(&self) -> Result<Option<InstalledApp>>;
}

/// Mutable record shared across a chain of operations. An error left here
/// by an upstream step short-circuits every downstream operation.
#[derive(Clone)]
pub struct OperationContext {
    inner: Arc<Mutex<ContextState>>,
}

struct ContextState {
    bundle_identifier: String,
    installed_app: Option<InstalledApp>,
    error: Option<OperationError>,
}

impl OperationContext {
    pub fn new(bundle_identifier: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextState {
                bundle_identifier: bundle_identifier.into(),
                installed_app: None,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bundle_identifier(&self) -> String {
        self.lock().bundle_identifier.clone()
    }

    pub fn installed_app(&self) -> Option<InstalledApp> {
        self.lock().installed_app.clone()
    }

    pub fn set_installed_app(&self, app: InstalledApp) {
        self.lock().installed_app = Some(app);
    }

    pub fn error(&self) -> Option<OperationError> {
        self.lock().error.clone()
    }

    pub fn set_error(&self, error: OperationError) {
        self.lock().error = Some(error);
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Launching,
    AwaitingReturn,
    AwaitingCompletion,
}

/// Hands an installed app over to its own backup/restore flow and waits for
/// the round trip back.
pub struct BackupAppOperation {
    action: BackupAction,
    context: OperationContext,
    registry: Arc<dyn AppRegistry>,
    launcher: Arc<dyn ExternalLauncher>,
    events: Arc<AppEvents>,
}

impl BackupAppOperation {
    pub fn new(
        action: BackupAction,
        context: OperationContext,
        registry: Arc<dyn AppRegistry>,
        launcher: Arc<dyn ExternalLauncher>,
        events: Arc<AppEvents>,
    ) -> Self {
        Self {
            action,
            context,
            registry,
            launcher,
            events,
        }
    }

    async fn run(&self) -> Result<(), OperationError> {
        if let Some(error) = self.context.error() {
            return Err(error);
        }
        let Some(app) = self.context.installed_app() else {
            return Err(OperationError::InvalidParameters);
        };

        let host_app = match self.registry.host_app().await {
            Ok(Some(host_app)) => host_app,
            Ok(None) => return Err(OperationError::AppNotFound),
            Err(error) => {
                warn!("backup: host app lookup failed: {error:#}");
                return Err(OperationError::AppNotFound);
            }
        };

        let open_failed = || OperationError::OpenAppFailed {
            name: app.name.clone(),
        };
        let return_url = protocol::return_url(&host_app).ok_or_else(open_failed)?;
        let open_url =
            protocol::handoff_url(&app, self.action, &return_url).ok_or_else(open_failed)?;

        debug!(
            phase = ?Phase::Launching,
            app = %app.bundle_identifier,
            action = %self.action,
            "handing control to external app"
        );
        sleep(LAUNCH_DELAY).await;

        let attempt = self.launcher.open(&open_url).await;
        if !attempt.accepted {
            if attempt.elapsed >= FAST_FAIL_THRESHOLD {
                return Err(open_failed());
            }
            info!(
                "backup: launch of {} rejected after {:?}, retrying once",
                app.bundle_identifier, attempt.elapsed
            );
            sleep(RETRY_DELAY).await;
            let retry = self.launcher.open(&open_url).await;
            if !retry.accepted {
                return Err(open_failed());
            }
        }

        self.await_response(&app).await
    }

    /// Waits for the foreground round trip, then for the external app's
    /// response, bounded by the completion timeout.
    async fn await_response(&self, app: &InstalledApp) -> Result<(), OperationError> {
        debug!(
            phase = ?Phase::AwaitingReturn,
            app = %app.bundle_identifier,
            "waiting for control to return"
        );
        let mut foreground = self.events.app_will_enter_foreground.subscribe();
        if foreground.next().await.is_none() {
            return Err(OperationError::UnknownResult);
        }
        foreground.retract();

        debug!(
            phase = ?Phase::AwaitingCompletion,
            app = %app.bundle_identifier,
            "waiting for external app's response"
        );
        let mut responses = self.events.backup_response.subscribe();
        let deadline = sleep(COMPLETION_TIMEOUT + COMPLETION_SETTLE_DELAY);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                response = responses.next() => match response {
                    Some(response) if response.bundle_identifier == app.bundle_identifier => {
                        return response.result.unwrap_or(Err(OperationError::UnknownResult));
                    }
                    // Another coordinator's response; keep waiting.
                    Some(_) => continue,
                    None => return Err(OperationError::UnknownResult),
                },
                _ = &mut deadline => return Err(OperationError::TimedOut),
            }
        }
    }

    fn finish(&self, outcome: Result<(), OperationError>, result: &CancellableResult<()>) {
        let outcome = outcome.map_err(|error| {
            // Upstream context errors and bare cancellation pass through
            // unannotated: the first would be double-wrapped, the second is
            // a control signal rather than a user-facing failure.
            if error == OperationError::Cancelled || self.context.error().as_ref() == Some(&error) {
                return error;
            }
            let app_name = self
                .context
                .installed_app()
                .map(|app| app.name)
                .unwrap_or_else(|| self.context.bundle_identifier());
            let failure = match self.action {
                BackupAction::Backup => {
                    format!("Could not back up \u{201c}{app_name}\u{201d}.")
                }
                BackupAction::Restore => {
                    format!("Could not restore \u{201c}{app_name}\u{201d}.")
                }
            };
            error.with_failure(failure)
        });

        match &outcome {
            Ok(()) => info!(
                "backup: {} of {} finished",
                self.action,
                self.context.bundle_identifier()
            ),
            Err(error) => warn!(
                "backup: {} of {} failed: {error}",
                self.action,
                self.context.bundle_identifier()
            ),
        }
        result.resolve(outcome);
    }
}

#[async_trait]
impl Operation for BackupAppOperation {
    type Output = ();

    async fn perform(self, result: CancellableResult<()>) {
        // Racing the body against the cancellation flag drops any live
        // subscriptions and timers the moment cancellation is observed.
        let outcome = tokio::select! {
            _ = result.cancelled() => Err(OperationError::Cancelled),
            outcome = self.run() => outcome,
        };
        self.finish(outcome, &result);
    }
}

#[cfg(test)]
mod tests;
