//! Document store trait: the persisted, shared medium all clients write to.
//!
//! Documents are JSON objects addressed by a slash-separated key
//! (`collection/id`). Every write bumps a per-document revision which
//! [`DocumentStore::compare_and_set`] uses for optimistic concurrency.
//! There are no cross-document transactions and no locks held across
//! writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppError;
use crate::result::AppResult;

/// A stored document together with its store-assigned revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document key (`collection/id`).
    pub key: String,
    /// Document body.
    pub data: Value,
    /// Monotonic per-key revision, starting at 1 on creation.
    pub revision: u64,
    /// When the store accepted the last write.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserialize the document body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            AppError::with_source(
                crate::error::ErrorKind::Serialization,
                format!("Failed to decode document '{}': {e}", self.key),
                e,
            )
        })
    }
}

/// Serialize a typed value into a document body.
pub fn encode<T: Serialize>(value: &T) -> AppResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Serialize a typed value into a field map suitable for [`DocumentStore::merge`].
pub fn encode_fields<T: Serialize>(value: &T) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::validation(format!(
            "Expected an object for a field patch, got {other}"
        ))),
    }
}

/// A single change notification. `document` is `None` after a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// Key of the changed document.
    pub key: String,
    /// The document as of this change.
    pub document: Option<Document>,
}

/// Which keys a watch is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFilter {
    /// Exactly one document key.
    Key(String),
    /// Every key starting with the prefix (a collection).
    Prefix(String),
}

impl WatchFilter {
    /// Whether a change to `key` should be delivered.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Key(k) => k == key,
            Self::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Event yielded by a [`DocumentWatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A matching document changed.
    Changed(DocumentChange),
    /// The watcher fell behind and missed this many changes; re-read to resync.
    Lagged(u64),
}

/// Change subscription handed out by a [`DocumentStore`].
///
/// Dropping the watch unsubscribes.
#[derive(Debug)]
pub struct DocumentWatch {
    receiver: broadcast::Receiver<DocumentChange>,
    filter: WatchFilter,
}

impl DocumentWatch {
    /// Wrap a raw change receiver with a key filter.
    pub fn new(receiver: broadcast::Receiver<DocumentChange>, filter: WatchFilter) -> Self {
        Self { receiver, filter }
    }

    /// The filter this watch applies.
    pub fn filter(&self) -> &WatchFilter {
        &self.filter
    }

    /// Wait for the next matching event. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.filter.matches(&change.key) => {
                    return Some(WatchEvent::Changed(change));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, filter = ?self.filter, "Document watch lagged");
                    return Some(WatchEvent::Lagged(missed));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Trait for document store backends.
///
/// Implementations must apply each single-document operation atomically;
/// nothing more is assumed.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug + 'static {
    /// Point read. Returns `None` if the document does not exist.
    async fn get(&self, key: &str) -> AppResult<Option<Document>>;

    /// Overwrite (or create) a document. Returns the new revision.
    async fn set(&self, key: &str, data: Value) -> AppResult<u64>;

    /// Shallow field merge: each top-level field in `patch` replaces the
    /// stored field, others are kept. Creates the document if missing.
    /// Returns the new revision.
    async fn merge(&self, key: &str, patch: Map<String, Value>) -> AppResult<u64>;

    /// Write `data` only if the current revision equals `expected_revision`
    /// (`None` meaning "must not exist"). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> AppResult<bool>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// List every document whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> AppResult<Vec<Document>>;

    /// Subscribe to changes matching `filter`.
    async fn watch(&self, filter: WatchFilter) -> AppResult<DocumentWatch>;

    /// Check that the store backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
