// Scripted fakes for the poller and reconciler seams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ddp_client::{Job, JobState, JobStatus, LockSource, LockedResource, PollerError, Result, StatusFetcher};
use tokio::time::Instant;

// =============================================================================
// Mock Status Fetcher
// =============================================================================

/// Arguments captured from a status fetch
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub job_id: String,
    pub seen_lines: usize,
    pub at: Instant,
}

struct Step {
    latency: Duration,
    result: Result<JobStatus>,
}

/// Returns queued responses in order; once the queue is empty every fetch
/// reports the job as still running.
#[derive(Clone)]
pub struct MockStatusFetcher {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<FetchCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockStatusFetcher {
    pub fn new() -> Self {
        Self {
            steps: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_status(self, status: JobStatus) -> Self {
        self.with_slow_status(Duration::ZERO, status)
    }

    /// Respond after `latency`, simulating a request still in flight.
    pub fn with_slow_status(self, latency: Duration, status: JobStatus) -> Self {
        self.steps.lock().unwrap().push_back(Step {
            latency,
            result: Ok(status),
        });
        self
    }

    pub fn with_error(self, error: PollerError) -> Self {
        self.steps.lock().unwrap().push_back(Step {
            latency: Duration::ZERO,
            result: Err(error),
        });
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusFetcher for MockStatusFetcher {
    async fn fetch_status(&self, job: &Job, seen_lines: usize) -> Result<JobStatus> {
        self.calls.lock().unwrap().push(FetchCall {
            job_id: job.job_id.clone(),
            seen_lines,
            at: Instant::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(step) => {
                if !step.latency.is_zero() {
                    tokio::time::sleep(step.latency).await;
                }
                step.result
            }
            None => Ok(JobStatus::with_state(JobState::Running)),
        }
    }
}

/// Wait until the fetcher has seen `count` calls.
pub async fn until_calls(fetcher: &MockStatusFetcher, count: usize) {
    while fetcher.call_count() < count {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Mock Lock Source
// =============================================================================

#[derive(Clone)]
pub struct MockLockSource {
    responses: Arc<Mutex<VecDeque<Result<Vec<LockedResource>>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLockSource {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_resources(self, resources: Vec<LockedResource>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(resources));
        self
    }

    pub fn with_error(self, error: PollerError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockSource for MockLockSource {
    async fn fetch_resources(&self) -> Result<Vec<LockedResource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![LockedResource::locked("still-running")]))
    }
}
