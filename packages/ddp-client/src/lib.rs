//! DDP backend client.
//!
//! Long-running work on the DDP backend (connection syncs, dbt runs, dbt
//! workspace setup, Elementary report refreshes) is submitted over HTTP and
//! then tracked by polling a status endpoint until the job finishes. This
//! crate provides that polling machinery and the HTTP client it runs on.
//!
//! - [`DdpClient`] submits jobs, checks their status and fetches logs.
//! - [`JobPoller`] runs one poll session per job and publishes a live log
//!   tail through a watch channel.
//! - [`BusyReconciler`] waits until no task in a collection is locked.
//! - [`ConsoleContext`] carries notifications and the current organisation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ddp_client::{ClientConfig, ConsoleContext, DdpClient, JobPoller};
//!
//! let config = ClientConfig::from_env()?;
//! let client = DdpClient::from_config(&config);
//! let ctx = ConsoleContext::new();
//!
//! let job = client.run_dbt_deployment("3f1c...").await?;
//! let poller = JobPoller::new(Arc::new(client), config.poll.clone());
//! let outcome = poller.poll_to_completion(job).await?;
//!
//! ctx.report_outcome(&outcome);
//! for line in &outcome.logs {
//!     println!("{}", line);
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod delay;
pub mod detector;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod normalize;
pub mod poller;
pub mod types;

pub use client::DdpClient;
pub use config::{ClientConfig, PollConfig};
pub use context::{ConsoleContext, Org, Severity, Toast};
pub use detector::{detect, Verdict};
pub use error::{PollerError, Result};
pub use fetcher::StatusFetcher;
pub use lock::{
    BusyHandle, BusyOutcome, BusyReconciler, BusyUpdate, LockSet, LockSource, LockedResource,
    ResourceLock,
};
pub use normalize::{canonical_state, Endpoint, EndpointTable, LogMode};
pub use poller::{JobPoller, PollHandle, PollOutcome, PollState, PollUpdate};
pub use types::{
    ElementarySetupStatus, Job, JobKind, JobState, JobStatus, SubmitResponse, SyncAttempt,
    SyncHistory, WorkspaceSetupRequest,
};
