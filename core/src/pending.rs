//! Durable queue of answer sets whose delivery failed recoverably.
//!
//! The queue lives under its own key and is independent of the session
//! lifecycle. Items are appended once and removed only after a successful
//! delivery; they are never edited in place.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::PENDING_QUEUE_KEY;
use crate::answers::SurveyAnswers;
use crate::persistence::{KeyValueStore, StorageError};

/// An answer set waiting for redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    pub id: String,
    pub answers: SurveyAnswers,
    pub captured_at: DateTime<Utc>,
}

impl PendingItem {
    /// Capture `answers` now under a fresh id.
    pub fn capture(answers: SurveyAnswers) -> Self {
        let captured_at = Utc::now();
        let id = format!(
            "pending-{}-{}",
            captured_at.timestamp_millis(),
            Uuid::new_v4().simple()
        );
        Self {
            id,
            answers,
            captured_at,
        }
    }
}

/// Handle over the `pending-queue` key. Every call reads storage afresh.
#[derive(Clone)]
pub struct PendingQueue {
    storage: Arc<dyn KeyValueStore>,
}

impl PendingQueue {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// All items in capture order.
    pub fn load(&self) -> Result<Vec<PendingItem>, StorageError> {
        Ok(self
            .storage
            .load_as::<Vec<PendingItem>>(PENDING_QUEUE_KEY)?
            .unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.load()?.is_empty())
    }

    /// Append `item` under the store's write lock, so concurrent appends
    /// and removals never drop each other's changes.
    pub fn append(&self, item: PendingItem) -> Result<(), StorageError> {
        let mut pending = 0;
        self.storage.update(PENDING_QUEUE_KEY, &mut |current| {
            let mut items = decode(current)?;
            items.push(item.clone());
            pending = items.len();
            Ok(Some(serde_json::to_value(&items)?))
        })?;
        tracing::info!(id = %item.id, pending, "queued submission for retry");
        Ok(())
    }

    /// Remove the items with the given ids, keeping everything else
    /// (including items appended since `ids` were read). Returns how many
    /// were removed.
    pub fn remove_ids(&self, ids: &[String]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut removed = 0;
        self.storage.update(PENDING_QUEUE_KEY, &mut |current| {
            let mut items = decode(current)?;
            let before = items.len();
            items.retain(|item| !wanted.contains(item.id.as_str()));
            removed = before - items.len();
            if items.is_empty() {
                Ok(None)
            } else {
                Ok(Some(serde_json::to_value(&items)?))
            }
        })?;
        Ok(removed)
    }
}

fn decode(current: Option<Value>) -> Result<Vec<PendingItem>, StorageError> {
    match current {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}
