//! Bounded, cancellable polling
//!
//! Every wait in the tooling (rollouts, pod readiness) goes through
//! [`poll_until`] so timeout and cancellation handling live in one place.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Default bound for deployment rollout waits
pub const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound for pod readiness waits
pub const POD_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between two probes
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline and poll interval for a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn rollout() -> Self {
        Self::new(ROLLOUT_TIMEOUT, POLL_INTERVAL)
    }

    pub fn pod_ready() -> Self {
        Self::new(POD_READY_TIMEOUT, POLL_INTERVAL)
    }
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut { elapsed: Duration },
    Cancelled,
}

impl<T> WaitOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready(_))
    }
}

/// Run `probe` until it yields a value, the deadline passes, or `cancel` fires.
///
/// The probe is always called at least once. A probe error ends the wait and
/// is returned as-is; there is no retry.
pub async fn poll_until<T, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        if let Some(value) = probe().await? {
            return Ok(WaitOutcome::Ready(value));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut {
                elapsed: now - start,
            });
        }

        let pause = policy.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
