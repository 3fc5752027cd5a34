//! Host-facing timing for queue drains.
//!
//! The core never decides when to drain on its own (apart from the single
//! drain scheduled after a fallback enqueue). Hosts call
//! [`DrainScheduler::run_once_after`] when a screen mounts and
//! [`DrainScheduler::spawn_periodic`] for background retries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::persistence::StorageError;
use crate::pipeline::{DrainOutcome, SubmissionPipeline};

/// Delay of the drain a host runs when it mounts.
pub const DEFAULT_MOUNT_DRAIN_DELAY: Duration = Duration::from_secs(2);

/// Period of background drains.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DrainScheduler {
    pipeline: SubmissionPipeline,
}

impl DrainScheduler {
    pub fn new(pipeline: SubmissionPipeline) -> Self {
        Self { pipeline }
    }

    /// Wait `delay`, then drain once.
    pub async fn run_once_after(&self, delay: Duration) -> Result<DrainOutcome, StorageError> {
        tokio::time::sleep(delay).await;
        let outcome = self.pipeline.drain_once().await;
        log_outcome(&outcome);
        outcome
    }

    /// Drain every `interval` until `token` is cancelled.
    ///
    /// The first drain happens one interval after the call. Cancellation is
    /// observed between drains only.
    pub async fn run_periodic(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            log_outcome(&self.pipeline.drain_once().await);
        }
        tracing::debug!("periodic drain stopped");
    }

    pub fn spawn_periodic(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_periodic(interval, token).await })
    }
}

fn log_outcome(outcome: &Result<DrainOutcome, StorageError>) {
    match outcome {
        Ok(DrainOutcome::Idle) => tracing::debug!("no pending submissions"),
        Ok(DrainOutcome::Busy) => tracing::debug!("skipped drain; another is running"),
        Ok(DrainOutcome::Drained(report)) => tracing::debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            "scheduled drain finished"
        ),
        Err(err) => tracing::warn!(error = %err, "scheduled drain could not read the queue"),
    }
}
