//! Cancellable sleeps.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Completed,
    Cancelled,
}

impl SleepOutcome {
    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }
}

/// Sleep for `duration`, returning early once `token` is cancelled.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> SleepOutcome {
    if token.is_cancelled() {
        return SleepOutcome::Cancelled;
    }
    tokio::select! {
        _ = token.cancelled() => SleepOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => SleepOutcome::Completed,
    }
}

/// Sleep `ticks` consecutive ticks of `tick`, checking `token` before each.
pub async fn sleep_in_ticks(ticks: u32, tick: Duration, token: &CancellationToken) -> SleepOutcome {
    for _ in 0..ticks {
        if sleep_or_cancel(tick, token).await.is_cancelled() {
            return SleepOutcome::Cancelled;
        }
    }
    SleepOutcome::Completed
}
