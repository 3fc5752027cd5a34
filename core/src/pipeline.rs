//! Submission pipeline: deliver, fall back to the pending queue, drain.
//!
//! ## Submit
//!
//! ```text
//! whole-form check ── missing ──▶ Incomplete (no network call)
//!        │
//!   deliver (bounded)
//!        ├─ Ok ─────────────▶ complete_and_clear ─▶ Delivered
//!        ├─ recoverable ────▶ enqueue ─▶ complete_and_clear ─▶ Deferred
//!        │                                 └─ spawn one delayed drain
//!        └─ non-recoverable ▶ Rejected (session untouched)
//! ```
//!
//! ## Drain
//!
//! Items are delivered one by one; only delivered ids are removed, and the
//! removal re-reads the queue so items appended mid-drain survive. A second
//! drain while one is running returns [`DrainOutcome::Busy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::pending::{PendingItem, PendingQueue};
use crate::persistence::StorageError;
use crate::session::{SessionError, SessionStore};
use crate::transport::{DeliveryError, DeliveryErrorKind, DeliveryTransport};
use crate::validation;
use crate::wire::{SinkRecord, WirePayload};

/// Reference budget for one sink call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the drain scheduled after a fallback enqueue.
pub const DEFAULT_DEFERRED_DRAIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The sink stored the survey.
    Delivered { record: SinkRecord },
    /// The sink was unreachable; the answers wait in the pending queue.
    Deferred {
        pending_id: String,
        kind: DeliveryErrorKind,
        reason: String,
    },
}

impl SubmitOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, SubmitOutcome::Deferred { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("answers are incomplete: missing {}", missing_fields.join(", "))]
    Incomplete { missing_fields: Vec<&'static str> },

    /// The sink was reached and did not accept the payload.
    #[error("{0}")]
    Rejected(DeliveryError),

    #[error("a submission is already in flight")]
    InFlight,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SubmitError {
    /// Field names the sink reported as missing, if it named any.
    pub fn rejected_fields(&self) -> &[String] {
        match self {
            SubmitError::Rejected(DeliveryError::Rejected { missing_fields, .. }) => missing_fields,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainItemOutcome {
    Delivered { record: SinkRecord },
    Failed { error: DeliveryError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainItemResult {
    pub id: String,
    pub outcome: DrainItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub results: Vec<DrainItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when delivered items could not be removed from the queue; they
    /// will be sent again by the next drain.
    pub cleanup_error: Option<String>,
}

impl DrainReport {
    fn push(&mut self, result: DrainItemResult) {
        match result.outcome {
            DrainItemOutcome::Delivered { .. } => self.succeeded += 1,
            DrainItemOutcome::Failed { .. } => self.failed += 1,
        }
        self.results.push(result);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was pending.
    Idle,
    /// Another drain is running; nothing was sent.
    Busy,
    Drained(DrainReport),
}

/// Resets an in-flight flag on drop.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share the session, queue and in-flight flags.
#[derive(Clone)]
pub struct SubmissionPipeline {
    session: Arc<Mutex<SessionStore>>,
    queue: PendingQueue,
    transport: Arc<dyn DeliveryTransport>,
    request_timeout: Duration,
    deferred_drain_delay: Option<Duration>,
    submitting: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
}

impl SubmissionPipeline {
    pub fn new(
        session: Arc<Mutex<SessionStore>>,
        queue: PendingQueue,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self {
            session,
            queue,
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            deferred_drain_delay: Some(DEFAULT_DEFERRED_DRAIN_DELAY),
            submitting: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Upper bound on a single sink call, whatever the transport does.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Delay of the drain spawned after a fallback enqueue; `None` disables it.
    pub fn with_deferred_drain_delay(mut self, delay: Option<Duration>) -> Self {
        self.deferred_drain_delay = delay;
        self
    }

    pub fn session(&self) -> &Arc<Mutex<SessionStore>> {
        &self.session
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Submit the current session's answers.
    pub async fn submit(&self) -> Result<SubmitOutcome, SubmitError> {
        let Some(_guard) = FlightGuard::acquire(&self.submitting) else {
            return Err(SubmitError::InFlight);
        };

        let answers = self.session.lock().await.answers().clone();
        let missing_fields = validation::missing_fields(&answers);
        if !missing_fields.is_empty() {
            tracing::debug!(?missing_fields, "submission blocked by incomplete answers");
            return Err(SubmitError::Incomplete { missing_fields });
        }

        let payload = WirePayload::from(&answers);
        match self.attempt(&payload).await {
            Ok(record) => {
                tracing::info!(id = %record.id, "survey delivered");
                // Delivery stands even if the checkpoint cannot be cleared.
                if let Err(err) = self.session.lock().await.complete_and_clear() {
                    tracing::error!(id = %record.id, error = %err, "delivered survey but could not clear the session");
                }
                Ok(SubmitOutcome::Delivered { record })
            }
            Err(error) if error.is_recoverable() => {
                let kind = error.kind();
                tracing::warn!(kind = kind.as_str(), %error, "sink unreachable; queueing for retry");

                let item = PendingItem::capture(answers);
                let pending_id = item.id.clone();
                self.queue.append(item)?;
                self.session.lock().await.complete_and_clear()?;
                self.schedule_deferred_drain();

                Ok(SubmitOutcome::Deferred {
                    pending_id,
                    kind,
                    reason: error.to_string(),
                })
            }
            Err(error) => {
                tracing::warn!(kind = error.kind().as_str(), %error, "sink refused submission");
                Err(SubmitError::Rejected(error))
            }
        }
    }

    /// Try to deliver every pending item once.
    pub async fn drain_once(&self) -> Result<DrainOutcome, StorageError> {
        let Some(_guard) = FlightGuard::acquire(&self.draining) else {
            tracing::debug!("drain already in flight");
            return Ok(DrainOutcome::Busy);
        };

        let items = self.queue.load()?;
        if items.is_empty() {
            return Ok(DrainOutcome::Idle);
        }
        tracing::info!(pending = items.len(), "draining pending submissions");

        let mut report = DrainReport::default();
        let mut delivered = Vec::new();
        for item in items {
            let payload = WirePayload::from(&item.answers);
            let outcome = match self.attempt(&payload).await {
                Ok(record) => {
                    tracing::info!(id = %item.id, record = %record.id, "pending submission delivered");
                    delivered.push(item.id.clone());
                    DrainItemOutcome::Delivered { record }
                }
                Err(error) => {
                    tracing::warn!(
                        id = %item.id,
                        kind = error.kind().as_str(),
                        %error,
                        "pending submission still undeliverable"
                    );
                    DrainItemOutcome::Failed { error }
                }
            };
            report.push(DrainItemResult {
                id: item.id,
                outcome,
            });
        }

        if let Err(err) = self.queue.remove_ids(&delivered) {
            tracing::error!(
                delivered = delivered.len(),
                error = %err,
                "could not remove delivered items from the pending queue"
            );
            report.cleanup_error = Some(err.to_string());
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "drain finished"
        );
        Ok(DrainOutcome::Drained(report))
    }

    /// Same operation as [`drain_once`](Self::drain_once).
    pub async fn retry_pending(&self) -> Result<DrainOutcome, StorageError> {
        self.drain_once().await
    }

    async fn attempt(&self, payload: &WirePayload) -> Result<SinkRecord, DeliveryError> {
        match tokio::time::timeout(self.request_timeout, self.transport.deliver(payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.request_timeout)),
        }
    }

    fn schedule_deferred_drain(&self) {
        let Some(delay) = self.deferred_drain_delay else {
            return;
        };
        let pipeline = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = pipeline.drain_once().await {
                tracing::warn!(error = %err, "deferred drain failed");
            }
        });
    }
}
