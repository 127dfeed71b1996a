//! One download session: the store, the event hub, the synchronizer and both
//! controllers wired to the same backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::info;

use crate::backend::QueueBackend;
use crate::config::AppConfig;
use crate::events::EventHub;
use crate::flow::{FlowController, FlowPhase};
use crate::progress::{
    CompletionSummary, FailedTrack, OverallProgress, RateLimitStatus, failed_tracks,
};
use crate::queue::{QueueState, QueueStore};
use crate::retry::RetryController;
use crate::sync::EventSynchronizer;

/// Shared state for a single application session.
#[derive(Debug)]
pub struct DownloadSession {
    store: QueueStore,
    hub: EventHub,
    synchronizer: Mutex<EventSynchronizer>,
    flow: Arc<FlowController>,
    retry: Arc<RetryController>,
}

impl DownloadSession {
    /// Create a detached session from `config`.
    #[must_use]
    pub fn new(config: &AppConfig, backend: Arc<dyn QueueBackend>) -> Self {
        let hub = EventHub::with_capacity(config.event_buffer_capacity());
        Self::with_hub(config, backend, hub)
    }

    /// Create a detached session listening on an existing hub.
    #[must_use]
    pub fn with_hub(config: &AppConfig, backend: Arc<dyn QueueBackend>, hub: EventHub) -> Self {
        let store = QueueStore::new();
        let flow = FlowController::new(store.clone(), Arc::clone(&backend))
            .with_download_directory(config.download_directory.clone())
            .with_track_url_template(config.track_url_template.clone());
        let retry = RetryController::new(store.clone(), backend)
            .with_track_url_template(config.track_url_template.clone());
        let synchronizer = EventSynchronizer::new(hub.clone(), store.clone());

        Self {
            store,
            hub,
            synchronizer: Mutex::new(synchronizer),
            flow: Arc::new(flow),
            retry: Arc::new(retry),
        }
    }

    fn synchronizer(&self) -> MutexGuard<'_, EventSynchronizer> {
        self.synchronizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start applying backend events. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self) {
        self.synchronizer().attach();
        info!("Download session attached");
    }

    /// Stop applying backend events.
    pub fn detach(&self) {
        self.synchronizer().detach();
    }

    /// Whether backend events are being applied.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.synchronizer().is_attached()
    }

    /// The queue store.
    #[must_use]
    pub const fn store(&self) -> &QueueStore {
        &self.store
    }

    /// The hub backend events arrive on.
    #[must_use]
    pub const fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// The flow controller.
    #[must_use]
    pub fn flow(&self) -> Arc<FlowController> {
        Arc::clone(&self.flow)
    }

    /// The retry controller.
    #[must_use]
    pub fn retry(&self) -> Arc<RetryController> {
        Arc::clone(&self.retry)
    }

    /// Receive a snapshot after each effective change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.store.subscribe()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> FlowPhase {
        self.flow.phase()
    }

    /// Current overall progress.
    #[must_use]
    pub fn overall_progress(&self) -> OverallProgress {
        self.store.read(OverallProgress::from_state)
    }

    /// Current completion summary.
    #[must_use]
    pub fn completion_summary(&self) -> CompletionSummary {
        self.store.read(CompletionSummary::from_state)
    }

    /// Current rate-limit status.
    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.store.read(RateLimitStatus::from_state)
    }

    /// Failed tracks in queue order.
    #[must_use]
    pub fn failed_tracks(&self) -> Vec<FailedTrack> {
        self.store.read(failed_tracks)
    }
}
