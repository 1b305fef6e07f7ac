//! Presence projection task: keeps `users/{id}` online flags in step with
//! presence records.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lessonsync_core::config::PresenceConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::store::{Document, DocumentStore, encode_fields};
use lessonsync_core::types::UserId;
use lessonsync_entity::presence::{PresenceRecord, UserFlag};
use lessonsync_store::keys;

use crate::retry::RetryPolicy;
use crate::task::{ReconcileTask, TaskError};

/// Projects effective presence onto each user's online flag.
///
/// This is the only writer of the flag. It re-derives the flag from the
/// presence record on every sweep, so a lost write is repaired by the next
/// one and a crashed client's flag decays to offline without that client.
#[derive(Debug)]
pub struct PresenceProjectionTask {
    /// Document store
    store: Arc<dyn DocumentStore>,
    /// Source of "now" for staleness decisions
    clock: Arc<dyn Clock>,
    /// Heartbeat staleness threshold
    stale_threshold: chrono::Duration,
    /// Retry schedule for flag writes
    retry: RetryPolicy,
}

impl PresenceProjectionTask {
    /// Create a new projection task
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        presence: &PresenceConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            stale_threshold: presence.stale_threshold(),
            retry,
        }
    }

    /// Project one user from an already-read presence document (or its
    /// absence). Returns whether the flag was rewritten.
    pub async fn project_document(
        &self,
        user_id: UserId,
        document: Option<&Document>,
    ) -> AppResult<bool> {
        let record = match document.map(|d| d.decode::<PresenceRecord>()).transpose() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping malformed presence record for {}: {}", user_id, e);
                return Ok(false);
            }
        };
        self.project(user_id, record.as_ref()).await
    }

    /// Read the presence record for a user and project it.
    pub async fn project_user(&self, user_id: UserId) -> AppResult<bool> {
        let document = self.store.get(&keys::presence(user_id)).await?;
        self.project_document(user_id, document.as_ref()).await
    }

    async fn project(&self, user_id: UserId, record: Option<&PresenceRecord>) -> AppResult<bool> {
        let flag_key = keys::user_flag(user_id);
        let previous = self
            .store
            .get(&flag_key)
            .await?
            .and_then(|doc| doc.decode::<UserFlag>().ok());

        let next = UserFlag::project(
            record,
            previous.as_ref(),
            self.clock.now(),
            self.stale_threshold,
        );
        if previous.as_ref().is_some_and(|p| p.same_state(&next)) {
            return Ok(false);
        }

        let patch = encode_fields(&next)?;
        self.retry
            .run("project_user_flag", || self.store.merge(&flag_key, patch.clone()))
            .await?;

        tracing::debug!(
            "Projected presence for {}: online={}",
            user_id,
            next.is_online
        );
        Ok(true)
    }
}

#[async_trait]
impl ReconcileTask for PresenceProjectionTask {
    fn name(&self) -> &str {
        "presence_projection"
    }

    async fn run_once(&self) -> Result<Value, TaskError> {
        let documents = self
            .store
            .list(keys::PRESENCE_PREFIX)
            .await
            .map_err(|e| TaskError::Transient(format!("Failed to list presence records: {}", e)))?;

        let mut projected = 0;
        let mut failed = 0;

        for document in &documents {
            let Some(user_id) = keys::user_id_from_presence_key(&document.key) else {
                tracing::warn!("Ignoring presence document with unexpected key '{}'", document.key);
                continue;
            };
            match self.project_document(user_id, Some(document)).await {
                Ok(true) => projected += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        "Failed to project presence for {}, next sweep retries: {}",
                        user_id,
                        e
                    );
                }
            }
        }

        if projected > 0 || failed > 0 {
            tracing::info!(
                "Presence projection: {} flags updated, {} failed, {} records scanned",
                projected,
                failed,
                documents.len()
            );
        }

        Ok(serde_json::json!({
            "task": "presence_projection",
            "records_scanned": documents.len(),
            "flags_updated": projected,
            "failed": failed,
        }))
    }
}
