//! The single in-progress survey session.
//!
//! [`SessionStore`] is the only writer of [`SurveyAnswers`]. Every mutation
//! is checkpointed to the `session` key before it becomes visible in memory,
//! so a reload always resumes from the last acknowledged state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::SESSION_KEY;
use crate::answers::{AnswersPatch, FeatureKey, MAX_RATING, MIN_RATING, SurveyAnswers};
use crate::persistence::{KeyValueStore, StorageError};
use crate::validation::{self, LAST_PAGE, SurveyPage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Inactive,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Inactive => "inactive",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

/// Persisted shape of the `session` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub session_status: SessionStatus,
    #[serde(default)]
    pub survey_data: SurveyAnswers,
    #[serde(default)]
    pub current_page: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("page {page} is incomplete: missing {}", missing.join(", "))]
    PageIncomplete {
        page: usize,
        missing: Vec<&'static str>,
    },

    #[error("rating {rating} for {feature} is outside 1..=5")]
    InvalidRating { feature: FeatureKey, rating: u8 },
}

/// Owner of the in-progress [`Session`].
///
/// One instance per process; hosts construct it once and hand it to the
/// [`SubmissionPipeline`](crate::SubmissionPipeline).
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    session: Session,
}

impl SessionStore {
    /// Load the persisted session, or start from the empty inactive shape.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Result<Self, SessionError> {
        let mut session: Session = storage.load_as(SESSION_KEY)?.unwrap_or_default();
        session.current_page = session.current_page.min(LAST_PAGE);
        tracing::debug!(
            status = session.session_status.as_str(),
            page = session.current_page,
            "loaded session"
        );
        Ok(Self { storage, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn answers(&self) -> &SurveyAnswers {
        &self.session.survey_data
    }

    pub fn current_page(&self) -> usize {
        self.session.current_page
    }

    pub fn status(&self) -> SessionStatus {
        self.session.session_status
    }

    /// Fields the current page still needs before [`advance_page`](Self::advance_page) succeeds.
    pub fn current_page_missing(&self) -> Vec<&'static str> {
        SurveyPage::from_index(self.session.current_page)
            .map(|page| validation::missing_fields_for_page(page, self.answers()))
            .unwrap_or_default()
    }

    /// Shallow-merge `patch` into the answers. No validation.
    pub fn update_answers(&mut self, patch: AnswersPatch) -> Result<(), SessionError> {
        let mut next = self.session.clone();
        next.survey_data.merge(patch);
        self.commit(next)
    }

    /// Set one feature rating, keeping the others.
    pub fn rate_feature(&mut self, feature: FeatureKey, rating: u8) -> Result<(), SessionError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(SessionError::InvalidRating { feature, rating });
        }
        let mut ratings = self.session.survey_data.feature_ratings.clone();
        ratings.insert(feature, rating);
        self.update_answers(AnswersPatch::with_feature_ratings(ratings))
    }

    /// Jump to `index` without validation. Out-of-range lands on the last page.
    pub fn set_page(&mut self, index: i64) -> Result<usize, SessionError> {
        let mut next = self.session.clone();
        next.current_page = validation::resolve_page_index(index);
        self.commit(next)?;
        Ok(self.session.current_page)
    }

    /// Move forward one page if the current page is complete.
    pub fn advance_page(&mut self) -> Result<usize, SessionError> {
        let page = self.session.current_page;
        let missing = self.current_page_missing();
        if !missing.is_empty() {
            tracing::debug!(page, ?missing, "page incomplete; not advancing");
            return Err(SessionError::PageIncomplete { page, missing });
        }

        let mut next = self.session.clone();
        next.current_page = (page + 1).min(LAST_PAGE);
        self.commit(next)?;
        Ok(self.session.current_page)
    }

    /// Move back one page, stopping at the first.
    pub fn back(&mut self) -> Result<usize, SessionError> {
        let mut next = self.session.clone();
        next.current_page = next.current_page.saturating_sub(1);
        self.commit(next)?;
        Ok(self.session.current_page)
    }

    /// Discard whatever is in progress and begin an empty active session.
    pub fn start_fresh_survey(&mut self) -> Result<(), SessionError> {
        let next = Session {
            session_status: SessionStatus::Active,
            ..Session::default()
        };
        self.storage.save_as(SESSION_KEY, &next)?;
        self.session = next;
        tracing::info!("started fresh survey");
        Ok(())
    }

    /// Mark the session completed and drop it from storage entirely.
    ///
    /// Afterwards the store holds the same empty inactive session a fresh
    /// process would load.
    pub fn complete_and_clear(&mut self) -> Result<(), SessionError> {
        self.storage.remove(SESSION_KEY)?;
        let previous = self.session.session_status;
        self.session.session_status = SessionStatus::Completed;
        tracing::info!(from = previous.as_str(), "session completed");
        self.session = Session::default();
        Ok(())
    }

    fn commit(&mut self, mut next: Session) -> Result<(), SessionError> {
        if next.session_status == SessionStatus::Inactive {
            next.session_status = SessionStatus::Active;
            tracing::info!("session activated");
        }
        self.storage.save_as(SESSION_KEY, &next)?;
        self.session = next;
        Ok(())
    }
}
