//! Event synchronizer: keeps the queue store in step with backend events.
//!
//! Each inbound event maps to exactly one container mutation (plus rate-limit
//! detection for per-track events). Events are applied unconditionally; the
//! container's no-op semantics absorb stale and duplicated events.

use tracing::{debug, error, info, warn};

use crate::events::{BackendEvent, DownloadProgressEvent, EventHub, Listener};
use crate::queue::QueueStore;
use crate::track::{ErrorCode, TrackStatus};

/// Apply one decoded backend event to the store.
pub fn apply_event(store: &QueueStore, event: BackendEvent) {
    match event {
        BackendEvent::DownloadProgress(progress) => {
            detect_rate_limit(store, &progress);
            if let Some(e) = &progress.error {
                error!("Track {} error: {} - {}", progress.track_id, e.code, e.message);
            }
            store.update_track_status(&progress.track_id, progress.status, progress.error);
        }
        BackendEvent::QueueProgress(progress) => {
            store.set_queue_progress(progress.current, progress.total);
        }
        BackendEvent::QueueComplete(result) => store.set_queue_complete(&result),
        BackendEvent::QueueCancelled(result) => store.set_queue_cancelled(&result),
    }
}

/// Rate limiting is signaled per track and cleared by renewed progress; the
/// backend never sends an explicit "cleared" event.
fn detect_rate_limit(store: &QueueStore, progress: &DownloadProgressEvent) {
    let limited = progress.status == TrackStatus::RateLimited
        || progress
            .error
            .as_ref()
            .is_some_and(|e| e.code == ErrorCode::RateLimited);

    if limited {
        warn!("Rate limit detected for track {}", progress.track_id);
        store.set_rate_limited(true);
    } else if progress.status.is_active() {
        store.set_rate_limited(false);
    }
}

/// Owns at most one listener and routes payloads into the store.
///
/// All four channels are delivered by that one listener, so events are
/// applied in the order the backend emitted them. Dropping the synchronizer
/// detaches it.
#[derive(Debug)]
pub struct EventSynchronizer {
    hub: EventHub,
    store: QueueStore,
    listener: Option<Listener>,
}

impl EventSynchronizer {
    /// Create a detached synchronizer.
    #[must_use]
    pub const fn new(hub: EventHub, store: QueueStore) -> Self {
        Self {
            hub,
            store,
            listener: None,
        }
    }

    /// Subscribe to every channel. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&mut self) {
        if self.listener.is_some() {
            debug!("Event synchronizer already attached");
            return;
        }
        let store = self.store.clone();
        let listener = self.hub.listen_all(move |channel, payload| {
            match BackendEvent::decode(channel, payload) {
                Ok(event) => apply_event(&store, event),
                Err(e) => warn!("Dropping event: {}", e),
            }
        });
        self.listener = Some(listener);
        info!("Event synchronizer attached");
    }

    /// Unsubscribe from every channel.
    ///
    /// When this returns, no further mutation can come from this synchronizer.
    pub fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.unlisten();
            info!("Event synchronizer detached");
        }
    }

    /// Whether backend events are being applied.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.listener.as_ref().is_some_and(Listener::is_active)
    }

    /// The store this synchronizer writes to.
    #[must_use]
    pub const fn store(&self) -> &QueueStore {
        &self.store
    }
}

impl Drop for EventSynchronizer {
    fn drop(&mut self) {
        self.detach();
    }
}
