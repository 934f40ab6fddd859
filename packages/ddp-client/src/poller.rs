//! Poll loop controller.
//!
//! A [`JobPoller`] turns a submitted [`Job`] into a polling session that
//! repeatedly asks a [`StatusFetcher`] for the job's status until it reaches a
//! terminal state:
//!
//! ```text
//! Idle ──start──► Polling ──Continue──► Polling
//!                    │
//!                    ├──Succeeded──────► Succeeded
//!                    ├──Failed / transport error / budget──► Failed
//!                    └──cancel()───────► Cancelled
//! ```
//!
//! Rounds are strictly sequential: the next fetch is only issued after the
//! previous result has been evaluated and the interval has elapsed. Every
//! round publishes a [`PollUpdate`] carrying the full accumulated log, so a
//! consumer can render a live tail from the watch channel alone.
//!
//! # Example
//!
//! ```rust,ignore
//! let poller = JobPoller::new(Arc::new(client.clone()), PollConfig::default());
//! let job = client.run_dbt_deployment("deployment-id").await?;
//! let handle = poller.start(job)?;
//!
//! let mut updates = handle.updates();
//! while updates.changed().await.is_ok() {
//!     let update = updates.borrow_and_update().clone();
//!     render(&update.logs);
//!     if update.state.is_terminal() {
//!         break;
//!     }
//! }
//! let outcome = handle.wait().await;
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::delay::delay_or_cancel;
use crate::detector::{detect, Verdict};
use crate::error::{PollerError, Result};
use crate::fetcher::StatusFetcher;
use crate::types::{Job, JobStatus};

/// Shown when the backend reports a failure without saying why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Job failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Succeeded,
    Failed,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Succeeded | PollState::Failed | PollState::Cancelled
        )
    }
}

/// What a consumer sees after every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub state: PollState,
    /// Every log line received so far, in arrival order.
    pub logs: Vec<String>,
    pub failure_message: Option<String>,
    /// Status fetches issued so far.
    pub attempts: u32,
}

impl Default for PollUpdate {
    fn default() -> Self {
        Self {
            state: PollState::Idle,
            logs: Vec::new(),
            failure_message: None,
            attempts: 0,
        }
    }
}

/// Final result of a poll session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub job: Job,
    pub state: PollState,
    pub logs: Vec<String>,
    pub failure_message: Option<String>,
    pub attempts: u32,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        self.state == PollState::Succeeded
    }

    fn from_update(job: Job, update: PollUpdate) -> Self {
        Self {
            job,
            state: update.state,
            logs: update.logs,
            failure_message: update.failure_message,
            attempts: update.attempts,
        }
    }
}

/// Starts poll sessions and makes sure no job is polled twice at once.
#[derive(Clone)]
pub struct JobPoller {
    fetcher: Arc<dyn StatusFetcher>,
    config: PollConfig,
    active: Arc<Mutex<HashSet<String>>>,
}

impl JobPoller {
    pub fn new(fetcher: Arc<dyn StatusFetcher>, config: PollConfig) -> Self {
        Self {
            fetcher,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Whether a session for `job_id` is currently running.
    pub fn is_polling(&self, job_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    /// Spawn a poll session for `job`.
    ///
    /// Fails with [`PollerError::AlreadyPolling`] if this poller already has
    /// an active session for the same job id.
    pub fn start(&self, job: Job) -> Result<PollHandle> {
        let guard = ActiveJob::claim(&self.active, &job.job_id)?;

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(PollUpdate::default());
        let session = PollSession {
            job: job.clone(),
            config: self.config.clone(),
            fetcher: Arc::clone(&self.fetcher),
            cancel: cancel.clone(),
            updates: tx,
            logs: Vec::new(),
            attempts: 0,
            is_active: true,
            started: Instant::now(),
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            session.run().await
        });

        Ok(PollHandle {
            job,
            cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            updates: rx,
            task,
        })
    }

    /// Start a session and wait for it to finish.
    pub async fn poll_to_completion(&self, job: Job) -> Result<PollOutcome> {
        Ok(self.start(job)?.wait().await)
    }
}

/// Releases a job id from the active set when the session ends, however it
/// ends.
struct ActiveJob {
    active: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl ActiveJob {
    fn claim(active: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Result<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(job_id.to_string()) {
            return Err(PollerError::AlreadyPolling(job_id.to_string()));
        }
        Ok(Self {
            active: Arc::clone(active),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Caller's side of a running session. Dropping the handle cancels the
/// session.
pub struct PollHandle {
    job: Job,
    cancel: CancellationToken,
    cancel_on_drop: DropGuard,
    updates: watch::Receiver<PollUpdate>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Stop polling. No fetch is issued after this, and the result of one
    /// already in flight is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn updates(&self) -> watch::Receiver<PollUpdate> {
        self.updates.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the session to reach a terminal state.
    ///
    /// Dropping the returned future before it resolves cancels the session.
    pub async fn wait(self) -> PollOutcome {
        let Self {
            job,
            cancel_on_drop,
            updates,
            task,
            ..
        } = self;

        let joined = task.await;
        cancel_on_drop.disarm();

        match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job_id = %job.job_id, error = %err, "Poll session task ended abnormally");
                let mut last = updates.borrow().clone();
                last.state = PollState::Failed;
                last.failure_message = Some(err.to_string());
                PollOutcome::from_update(job, last)
            }
        }
    }
}

/// One job being polled. Owned by the spawned task.
struct PollSession {
    job: Job,
    config: PollConfig,
    fetcher: Arc<dyn StatusFetcher>,
    cancel: CancellationToken,
    updates: watch::Sender<PollUpdate>,
    logs: Vec<String>,
    attempts: u32,
    is_active: bool,
    started: Instant,
}

impl PollSession {
    async fn run(mut self) -> PollOutcome {
        info!(job_id = %self.job.job_id, kind = %self.job.kind, "Polling job");
        self.publish(PollState::Polling, None);

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(PollState::Cancelled, None);
            }
            if self.config.exhausted(self.attempts, self.started.elapsed()) {
                return self.give_up();
            }

            self.attempts += 1;
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.fetcher.fetch_status(&self.job, self.logs.len()) => Some(result),
            };

            // A result that lands after cancellation belongs to a dead session.
            let status = match fetched {
                Some(_) if self.cancel.is_cancelled() => {
                    return self.finish(PollState::Cancelled, None)
                }
                None => return self.finish(PollState::Cancelled, None),
                Some(Ok(status)) => status,
                Some(Err(err)) => {
                    warn!(
                        job_id = %self.job.job_id,
                        attempt = self.attempts,
                        error = %err,
                        "Status check failed, stopping"
                    );
                    return self.finish(PollState::Failed, Some(err.to_string()));
                }
            };

            let verdict = detect(&status);
            let JobStatus {
                log_lines,
                failure_message,
                ..
            } = status;
            self.logs.extend(log_lines);

            match verdict {
                Verdict::Succeeded => return self.finish(PollState::Succeeded, None),
                Verdict::Failed => {
                    let message =
                        failure_message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                    return self.finish(PollState::Failed, Some(message));
                }
                Verdict::Continue => {
                    debug!(
                        job_id = %self.job.job_id,
                        attempt = self.attempts,
                        logs = self.logs.len(),
                        "Job still in progress"
                    );
                    self.publish(PollState::Polling, None);
                }
            }

            if self.config.exhausted(self.attempts, self.started.elapsed()) {
                return self.give_up();
            }
            let pause = self.config.next_delay(self.started.elapsed());
            if !delay_or_cancel(pause, &self.cancel).await {
                return self.finish(PollState::Cancelled, None);
            }
        }
    }

    fn give_up(&mut self) -> PollOutcome {
        let message = format!(
            "Gave up waiting for job {} after {} attempts",
            self.job.job_id, self.attempts
        );
        self.finish(PollState::Failed, Some(message))
    }

    fn publish(&self, state: PollState, failure_message: Option<String>) {
        self.updates.send_replace(PollUpdate {
            state,
            logs: self.logs.clone(),
            failure_message,
            attempts: self.attempts,
        });
    }

    fn finish(&mut self, state: PollState, failure_message: Option<String>) -> PollOutcome {
        debug_assert!(self.is_active, "poll session finished twice");
        self.is_active = false;

        match state {
            PollState::Failed => warn!(
                job_id = %self.job.job_id,
                attempts = self.attempts,
                reason = failure_message.as_deref().unwrap_or(DEFAULT_FAILURE_MESSAGE),
                "Job failed"
            ),
            _ => info!(
                job_id = %self.job.job_id,
                attempts = self.attempts,
                state = ?state,
                "Polling finished"
            ),
        }

        self.publish(state, failure_message.clone());
        PollOutcome {
            job: self.job.clone(),
            state,
            logs: self.logs.clone(),
            failure_message,
            attempts: self.attempts,
        }
    }
}
