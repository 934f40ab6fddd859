//! Pacing between poll rounds.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Suspend the current task for at least `duration`.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Like [`delay`], but returns early if `cancel` fires.
///
/// Returns `true` when the full duration elapsed and `false` when the wait was
/// cut short by cancellation.
pub async fn delay_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = delay(duration) => true,
    }
}
