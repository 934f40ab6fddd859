//! Lock/busy reconciler.
//!
//! Some actions (running a dbt task, regenerating a report) must stay
//! disabled while any task in a collection is locked by a running job. The
//! [`BusyReconciler`] re-fetches the whole collection each round, rebuilds
//! the [`LockSet`] from scratch, and stops at the first round where nothing
//! is locked.
//!
//! Errors fail open: a round that cannot reach the backend ends the session
//! as not-busy so the caller never gets stuck behind a permanently disabled
//! action.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::delay::delay_or_cancel;
use crate::error::{PollerError, Result};
use crate::types::id_string;

/// Ids of the resources currently reported locked.
pub type LockSet = BTreeSet<String>;

/// Who holds a lock and since when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "lockedBy", default)]
    pub locked_by: Option<String>,
    #[serde(rename = "lockedAt", default)]
    pub locked_at: Option<String>,
}

/// One entry of a lockable collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedResource {
    pub id: String,
    pub lock: Option<ResourceLock>,
}

impl LockedResource {
    pub fn unlocked(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lock: None,
        }
    }

    pub fn locked(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lock: Some(ResourceLock::default()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// Source of the lockable collection.
#[async_trait]
pub trait LockSource: Send + Sync {
    async fn fetch_resources(&self) -> Result<Vec<LockedResource>>;
}

/// Parse a JSON array of resources.
///
/// Each element is identified by `uuid` or `id`. A `lock` that is absent or
/// `null` means unlocked; any other value means locked.
pub fn parse_resources(body: &Value) -> Result<Vec<LockedResource>> {
    let items = body
        .as_array()
        .ok_or_else(|| PollerError::Parse("expected an array of resources".into()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = ["uuid", "id"]
                .iter()
                .find_map(|key| item.get(*key).and_then(id_string));
            let Some(id) = id else {
                debug!("Skipping resource without an id");
                return None;
            };
            let lock = match item.get("lock") {
                None | Some(Value::Null) => None,
                Some(value) => Some(
                    serde_json::from_value::<ResourceLock>(value.clone()).unwrap_or_default(),
                ),
            };
            Some(LockedResource { id, lock })
        })
        .collect())
}

/// Rebuild the lock set from one fetch.
pub fn lock_set(resources: &[LockedResource]) -> LockSet {
    resources
        .iter()
        .filter(|r| r.is_locked())
        .map(|r| r.id.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyUpdate {
    pub busy: bool,
    pub locked: LockSet,
    pub rounds: u32,
}

/// How a reconciler session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusyOutcome {
    /// A round found nothing locked.
    Idle,
    /// A round failed; treated as not busy.
    FetchFailed(String),
    /// The poll budget ran out while resources were still locked; treated as
    /// not busy.
    GaveUp { locked: LockSet },
    Cancelled,
}

pub struct BusyReconciler {
    source: Arc<dyn LockSource>,
    config: PollConfig,
}

impl BusyReconciler {
    pub fn new(source: Arc<dyn LockSource>, config: PollConfig) -> Self {
        Self { source, config }
    }

    pub fn start(&self) -> BusyHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(BusyUpdate {
            busy: true,
            locked: LockSet::new(),
            rounds: 0,
        });

        let session = BusySession {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            cancel: cancel.clone(),
            updates: tx,
            rounds: 0,
            started: Instant::now(),
        };

        BusyHandle {
            cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            updates: rx,
            task: tokio::spawn(session.run()),
        }
    }
}

/// Dropping the handle cancels the session.
pub struct BusyHandle {
    cancel: CancellationToken,
    cancel_on_drop: DropGuard,
    updates: watch::Receiver<BusyUpdate>,
    task: JoinHandle<BusyOutcome>,
}

impl BusyHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn updates(&self) -> watch::Receiver<BusyUpdate> {
        self.updates.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.updates.borrow().busy
    }

    pub async fn wait(self) -> BusyOutcome {
        let joined = self.task.await;
        self.cancel_on_drop.disarm();

        match joined {
            Ok(outcome) => outcome,
            Err(err) => BusyOutcome::FetchFailed(err.to_string()),
        }
    }
}

struct BusySession {
    source: Arc<dyn LockSource>,
    config: PollConfig,
    cancel: CancellationToken,
    updates: watch::Sender<BusyUpdate>,
    rounds: u32,
    started: Instant,
}

impl BusySession {
    async fn run(mut self) -> BusyOutcome {
        let mut locked = LockSet::new();

        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled();
            }
            if self.rounds > 0 && self.config.exhausted(self.rounds, self.started.elapsed()) {
                return self.give_up(locked);
            }

            self.rounds += 1;
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.source.fetch_resources() => Some(result),
            };

            let resources = match fetched {
                None => return self.cancelled(),
                Some(_) if self.cancel.is_cancelled() => return self.cancelled(),
                Some(Ok(resources)) => resources,
                Some(Err(err)) => {
                    warn!(error = %err, round = self.rounds, "Lock check failed, treating as not busy");
                    self.publish(LockSet::new());
                    return BusyOutcome::FetchFailed(err.to_string());
                }
            };

            locked = lock_set(&resources);
            if locked.is_empty() {
                info!(round = self.rounds, "No resources locked");
                self.publish(locked);
                return BusyOutcome::Idle;
            }

            debug!(round = self.rounds, locked = ?locked, "Resources still locked");
            self.updates.send_replace(BusyUpdate {
                busy: true,
                locked: locked.clone(),
                rounds: self.rounds,
            });

            if self.config.exhausted(self.rounds, self.started.elapsed()) {
                return self.give_up(locked);
            }
            let pause = self.config.next_delay(self.started.elapsed());
            if !delay_or_cancel(pause, &self.cancel).await {
                return self.cancelled();
            }
        }
    }

    fn give_up(&self, locked: LockSet) -> BusyOutcome {
        warn!(round = self.rounds, locked = ?locked, "Gave up waiting for locks, treating as not busy");
        self.publish(LockSet::new());
        BusyOutcome::GaveUp { locked }
    }

    fn cancelled(&self) -> BusyOutcome {
        debug!(round = self.rounds, "Lock reconciler cancelled");
        self.publish(LockSet::new());
        BusyOutcome::Cancelled
    }

    /// Publish a not-busy update.
    fn publish(&self, locked: LockSet) {
        self.updates.send_replace(BusyUpdate {
            busy: false,
            locked,
            rounds: self.rounds,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_lock_objects_and_nulls() {
        let resources = parse_resources(&json!([
            {"id": "x", "lock": {}},
            {"id": "y", "lock": null},
            {"uuid": "z", "lock": {"lockedBy": "ops@example.org", "lockedAt": "2024-05-01T10:00:00Z"}},
            {"id": 7}
        ]))
        .unwrap();

        assert_eq!(resources.len(), 4);
        assert!(resources[0].is_locked());
        assert!(!resources[1].is_locked());
        assert_eq!(
            resources[2].lock.as_ref().and_then(|l| l.locked_by.as_deref()),
            Some("ops@example.org")
        );
        assert_eq!(resources[3].id, "7");
        assert!(!resources[3].is_locked());
    }

    #[test]
    fn lock_set_is_rebuilt_from_scratch() {
        let first = lock_set(&[LockedResource::locked("x"), LockedResource::unlocked("y")]);
        assert_eq!(first, LockSet::from(["x".to_string()]));

        let second = lock_set(&[LockedResource::unlocked("x"), LockedResource::locked("y")]);
        assert_eq!(second, LockSet::from(["y".to_string()]));
    }

    #[test]
    fn non_array_body_is_a_parse_error() {
        assert!(matches!(
            parse_resources(&json!({"tasks": []})),
            Err(PollerError::Parse(_))
        ));
    }

    #[test]
    fn resources_without_ids_are_skipped() {
        let resources = parse_resources(&json!([{"lock": {}}, {"id": "a"}])).unwrap();
        assert_eq!(resources, vec![LockedResource::unlocked("a")]);
    }
}
