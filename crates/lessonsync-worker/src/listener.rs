//! Event-driven presence projection.
//!
//! Projects a user's flag as soon as their presence record changes, so the
//! flag does not have to wait for the next sweep. The sweep still runs and
//! covers anything this listener misses.

use std::sync::Arc;

use tokio::sync::watch;

use lessonsync_core::traits::store::{DocumentStore, WatchEvent, WatchFilter};
use lessonsync_store::keys;

use crate::task::ReconcileTask;
use crate::tasks::PresenceProjectionTask;

/// Watches the presence collection and projects every change.
#[derive(Debug)]
pub struct ProjectionListener {
    /// Document store
    store: Arc<dyn DocumentStore>,
    /// Projection logic shared with the periodic sweep
    projection: Arc<PresenceProjectionTask>,
}

impl ProjectionListener {
    /// Create a new listener
    pub fn new(store: Arc<dyn DocumentStore>, projection: Arc<PresenceProjectionTask>) -> Self {
        Self { store, projection }
    }

    /// Run until the cancel signal is received or the store goes away.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let mut changes = match self
            .store
            .watch(WatchFilter::Prefix(keys::PRESENCE_PREFIX.to_string()))
            .await
        {
            Ok(changes) => changes,
            Err(e) => {
                tracing::error!("Projection listener could not watch presence: {}", e);
                return;
            }
        };

        tracing::info!("Projection listener started");

        loop {
            tokio::select! {
                res = cancel.changed() => {
                    if res.is_err() || *cancel.borrow() {
                        tracing::info!("Projection listener received shutdown signal");
                        break;
                    }
                }
                event = changes.next() => match event {
                    Some(WatchEvent::Changed(change)) => {
                        let Some(user_id) = keys::user_id_from_presence_key(&change.key) else {
                            continue;
                        };
                        if let Err(e) = self
                            .projection
                            .project_document(user_id, change.document.as_ref())
                            .await
                        {
                            tracing::warn!("Failed to project presence for {}: {}", user_id, e);
                        }
                    }
                    Some(WatchEvent::Lagged(missed)) => {
                        tracing::warn!("Projection listener missed {} changes, sweeping", missed);
                        if let Err(e) = self.projection.run_once().await {
                            tracing::error!("Catch-up sweep failed: {}", e);
                        }
                    }
                    None => {
                        tracing::warn!("Presence change feed closed");
                        break;
                    }
                }
            }
        }
    }
}
