//! Decides whether a poll session should keep going.

use crate::types::{JobState, JobStatus};

/// Outcome of evaluating one [`JobStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Succeeded,
    Failed,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Continue)
    }
}

/// `Completed` succeeds, `Failed` fails, anything else keeps polling.
///
/// A missing state (`None`) must never fail the job: resources with no
/// recorded outcome yet report no state at all.
pub fn detect(status: &JobStatus) -> Verdict {
    match status.state {
        Some(JobState::Completed) => Verdict::Succeeded,
        Some(JobState::Failed) => Verdict::Failed,
        Some(JobState::Pending) | Some(JobState::Running) | None => Verdict::Continue,
    }
}
