//! Realtime sources: a push channel plus a point read for one resource.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::de::DeserializeOwned;

use lessonsync_core::result::AppResult;
use lessonsync_core::traits::store::{Document, DocumentStore, DocumentWatch, WatchEvent, WatchFilter};

/// Anything that can push updates for a resource and be point-read.
#[async_trait]
pub trait RealtimeSource: Send + Sync + Debug + 'static {
    /// Value delivered to subscribers. Equality drives change detection.
    type Item: Clone + PartialEq + Send + Sync + Debug + 'static;

    /// Open the push channel for a resource.
    async fn subscribe(&self, resource_id: &str) -> AppResult<BoxStream<'static, Self::Item>>;

    /// Read the current value of a resource. `None` if it does not exist.
    async fn fetch(&self, resource_id: &str) -> AppResult<Option<Self::Item>>;
}

/// Adapts one document collection into a [`RealtimeSource`].
///
/// The resource id is appended to the collection prefix to form the key.
/// The push stream yields the current document first and then every newer
/// revision; deletions are skipped.
#[derive(Debug)]
pub struct DocumentSource<T> {
    store: Arc<dyn DocumentStore>,
    prefix: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> DocumentSource<T> {
    /// Create a source over the collection at `prefix`.
    pub fn new(store: Arc<dyn DocumentStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            _item: PhantomData,
        }
    }

    fn key(&self, resource_id: &str) -> String {
        format!("{}{}", self.prefix, resource_id)
    }
}

/// Unfold state behind a document push stream.
struct PushState<T> {
    watch: DocumentWatch,
    store: Arc<dyn DocumentStore>,
    key: String,
    revision: u64,
    initial: Option<T>,
}

impl<T: DeserializeOwned> PushState<T> {
    /// Decode a document if it is newer than the last one delivered.
    fn accept(&mut self, document: Option<Document>) -> Option<T> {
        let Some(doc) = document else {
            self.revision = 0;
            return None;
        };
        if doc.revision <= self.revision {
            return None;
        }
        self.revision = doc.revision;
        match doc.decode::<T>() {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(key = %self.key, "Skipping undecodable document: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl<T> RealtimeSource for DocumentSource<T>
where
    T: DeserializeOwned + Clone + PartialEq + Send + Sync + Debug + 'static,
{
    type Item = T;

    async fn subscribe(&self, resource_id: &str) -> AppResult<BoxStream<'static, T>> {
        let key = self.key(resource_id);
        // Watch before reading so nothing written in between is missed.
        let watch = self.store.watch(WatchFilter::Key(key.clone())).await?;

        let mut state = PushState {
            watch,
            store: Arc::clone(&self.store),
            key,
            revision: 0,
            initial: None,
        };
        match self.store.get(&state.key).await {
            Ok(document) => state.initial = state.accept(document),
            Err(e) => tracing::warn!(key = %state.key, "Initial snapshot read failed: {}", e),
        }

        let stream = stream::unfold(state, |mut state| async move {
            if let Some(item) = state.initial.take() {
                return Some((item, state));
            }
            loop {
                let document = match state.watch.next().await? {
                    WatchEvent::Changed(change) => change.document,
                    WatchEvent::Lagged(_) => match state.store.get(&state.key).await {
                        Ok(document) => document,
                        Err(e) => {
                            tracing::warn!(key = %state.key, "Resync after lag failed: {}", e);
                            continue;
                        }
                    },
                };
                if let Some(item) = state.accept(document) {
                    return Some((item, state));
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn fetch(&self, resource_id: &str) -> AppResult<Option<T>> {
        self.store
            .get(&self.key(resource_id))
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }
}

/// Serves one fixed resource whatever id it is asked for.
///
/// Lets several subscriptions to the same resource sit side by side in a
/// [`FallbackPoller`](super::fallback::FallbackPoller) under distinct ids.
#[derive(Debug)]
pub struct PinnedSource<S> {
    inner: S,
    resource_id: String,
}

impl<S> PinnedSource<S> {
    /// Pin `inner` to `resource_id`.
    pub fn new(inner: S, resource_id: impl Into<String>) -> Self {
        Self {
            inner,
            resource_id: resource_id.into(),
        }
    }
}

#[async_trait]
impl<S: RealtimeSource> RealtimeSource for PinnedSource<S> {
    type Item = S::Item;

    async fn subscribe(&self, _resource_id: &str) -> AppResult<BoxStream<'static, S::Item>> {
        self.inner.subscribe(&self.resource_id).await
    }

    async fn fetch(&self, _resource_id: &str) -> AppResult<Option<S::Item>> {
        self.inner.fetch(&self.resource_id).await
    }
}
