//! Store manager that dispatches to the configured provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use lessonsync_core::config::StoreConfig;
use lessonsync_core::error::AppError;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::store::{Document, DocumentStore, DocumentWatch, WatchFilter};

/// Store manager that wraps the configured document store provider.
///
/// The provider is selected at construction time based on configuration.
#[derive(Debug, Clone)]
pub struct StoreManager {
    /// The inner store provider.
    inner: Arc<dyn DocumentStore>,
}

impl StoreManager {
    /// Create a new store manager from configuration.
    pub fn new(config: &StoreConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let inner: Arc<dyn DocumentStore> = match config.provider.as_str() {
            #[cfg(feature = "memory")]
            "memory" => {
                info!(
                    buffer = config.channel_buffer_size,
                    "Initializing in-memory document store"
                );
                Arc::new(crate::memory::MemoryDocumentStore::with_clock(config, clock))
            }
            other => {
                let _ = clock;
                return Err(AppError::configuration(format!(
                    "Unknown store provider: '{other}'. Supported: memory"
                )));
            }
        };

        Ok(Self { inner })
    }

    /// Get a shared handle to the inner provider.
    pub fn provider(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.inner)
    }
}

#[async_trait]
impl DocumentStore for StoreManager {
    async fn get(&self, key: &str) -> AppResult<Option<Document>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, data: Value) -> AppResult<u64> {
        self.inner.set(key, data).await
    }

    async fn merge(&self, key: &str, patch: Map<String, Value>) -> AppResult<u64> {
        self.inner.merge(key, patch).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        data: Value,
        expected_revision: Option<u64>,
    ) -> AppResult<bool> {
        self.inner.compare_and_set(key, data, expected_revision).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<Document>> {
        self.inner.list(prefix).await
    }

    async fn watch(&self, filter: WatchFilter) -> AppResult<DocumentWatch> {
        self.inner.watch(filter).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.inner.health_check().await
    }
}
