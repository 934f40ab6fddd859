use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Job, JobStatus};

/// Performs one status check for a job.
///
/// Implementations normalize whatever the backend returns into a
/// [`JobStatus`]. Transport failures are returned as `Err`, never as an empty
/// or failed status.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    /// Fetch the current status of `job`.
    ///
    /// `seen_lines` is how many log lines the caller has already accumulated
    /// for this job; the returned status only carries lines after those.
    async fn fetch_status(&self, job: &Job, seen_lines: usize) -> Result<JobStatus>;
}
