//! `survey-core`: local-first survey session and resilient submission.
//!
//! Two cooperating components share one durable key-value store:
//!
//! - **[`SessionStore`]** owns the in-progress answers, the page cursor and
//!   the session lifecycle (`inactive → active → completed`).
//! - **[`SubmissionPipeline`]** delivers a completed answer set to the remote
//!   sink, falls back to the [`PendingQueue`] on transport failures, and
//!   drains that queue when connectivity returns.
//!
//! Timing is owned by the host: [`DrainScheduler`] is the seam a host uses to
//! trigger drains on mount or on an interval.
//!
//! ## Persisted keys
//!
//! ```text
//! session        { sessionStatus, surveyData, currentPage }
//! pending-queue  [ { id, answers, capturedAt }, ... ]
//! ```

pub mod answers;
pub mod config;
pub mod pending;
pub mod persistence;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod validation;
pub mod wire;

pub use answers::{AnswersPatch, FeatureKey, FeatureRatings, SurveyAnswers};
pub use config::{ConfigLoadError, ConfigLoader, SurveyConfig};
pub use pending::{PendingItem, PendingQueue};
pub use persistence::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use pipeline::{
    DrainItemOutcome, DrainItemResult, DrainOutcome, DrainReport, SubmissionPipeline, SubmitError,
    SubmitOutcome,
};
pub use scheduler::DrainScheduler;
pub use session::{Session, SessionError, SessionStatus, SessionStore};
pub use transport::{DeliveryError, DeliveryErrorKind, DeliveryTransport, HttpTransport};
pub use validation::{PAGE_COUNT, SurveyPage};
pub use wire::{SinkRecord, WirePayload};

/// Storage key of the single in-progress session.
pub const SESSION_KEY: &str = "session";

/// Storage key of the pending delivery queue.
pub const PENDING_QUEUE_KEY: &str = "pending-queue";
