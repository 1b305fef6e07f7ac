//! In-memory document store using dashmap.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use lessonsync_core::config::StoreConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::{Clock, SystemClock};
use lessonsync_core::traits::store::{
    Document, DocumentChange, DocumentStore, DocumentWatch, WatchFilter,
};

/// In-memory document store.
///
/// Each operation runs under the dashmap shard lock for its key, so
/// single-document writes are atomic. Change notifications carry the full
/// document with its revision; watchers compare revisions rather than rely
/// on delivery order.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    /// Key → document.
    documents: Arc<DashMap<String, Document>>,
    /// Change feed shared by every watch.
    changes: broadcast::Sender<DocumentChange>,
    /// Source of `updated_at` timestamps.
    clock: Arc<dyn Clock>,
}

impl MemoryDocumentStore {
    /// Create a new in-memory store from configuration.
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store stamping writes with the given clock.
    pub fn with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(config.channel_buffer_size.max(1));
        Self {
            documents: Arc::new(DashMap::new()),
            changes,
            clock,
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn publish(&self, key: &str, document: Option<Document>) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(DocumentChange {
            key: key.to_string(),
            document,
        });
    }

    fn write(&self, entry: Entry<'_, String, Document>, key: &str, data: Value) -> u64 {
        let now = self.clock.now();
        let document = match entry {
            Entry::Occupied(mut occupied) => {
                let doc = occupied.get_mut();
                doc.data = data;
                doc.revision += 1;
                doc.updated_at = now;
                doc.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(Document {
                    key: key.to_string(),
                    data,
                    revision: 1,
                    updated_at: now,
                })
                .value()
                .clone(),
        };
        let revision = document.revision;
        self.publish(key, Some(document));
        revision
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> AppResult<Option<Document>> {
        Ok(self.documents.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, data: Value) -> AppResult<u64> {
        let entry = self.documents.entry(key.to_string());
        Ok(self.write(entry, key, data))
    }

    async fn merge(&self, key: &str, patch: Map<String, Value>) -> AppResult<u64> {
        let entry = self.documents.entry(key.to_string());
        let merged = match &entry {
            Entry::Occupied(occupied) => {
                let mut base = match &occupied.get().data {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                base.extend(patch);
                base
            }
            Entry::Vacant(_) => patch,
        };
        Ok(self.write(entry, key, Value::Object(merged)))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> AppResult<bool> {
        let entry = self.documents.entry(key.to_string());
        let current = match &entry {
            Entry::Occupied(occupied) => Some(occupied.get().revision),
            Entry::Vacant(_) => None,
        };
        if current != expected_revision {
            debug!(key, ?current, ?expected_revision, "Compare-and-set lost the race");
            return Ok(false);
        }
        self.write(entry, key, data);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        if self.documents.remove(key).is_some() {
            self.publish(key, None);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.value().clone())
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(docs)
    }

    async fn watch(&self, filter: WatchFilter) -> AppResult<DocumentWatch> {
        Ok(DocumentWatch::new(self.changes.subscribe(), filter))
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
