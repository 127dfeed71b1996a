//! Retry controller: re-issues the start command for failed tracks.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::backend::{DEFAULT_TRACK_URL_TEMPLATE, QueueBackend, StartQueueRequest};
use crate::flow::CommandOutcome;
use crate::queue::{QueueState, QueueStore};
use crate::track::Track;

/// Whether a retry may be issued for `state`.
#[must_use]
pub const fn can_retry(state: &QueueState) -> bool {
    state.failed_count > 0 && !state.is_processing && !state.is_retrying
}

/// Retries failed tracks of the current generation.
pub struct RetryController {
    store: QueueStore,
    backend: Arc<dyn QueueBackend>,
    track_url_template: String,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("track_url_template", &self.track_url_template)
            .finish_non_exhaustive()
    }
}

impl RetryController {
    /// Create a controller writing to `store` and commanding `backend`.
    #[must_use]
    pub fn new(store: QueueStore, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            store,
            backend,
            track_url_template: DEFAULT_TRACK_URL_TEMPLATE.to_string(),
        }
    }

    /// Template used to build track URLs.
    #[must_use]
    pub fn with_track_url_template(mut self, template: impl Into<String>) -> Self {
        self.track_url_template = template.into();
        self
    }

    /// Whether a retry may be issued now.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.store.read(can_retry)
    }

    /// Retry every failed track.
    pub async fn retry_all_failed(&self) -> CommandOutcome {
        if !self.begin() {
            return CommandOutcome::Skipped;
        }
        let tracks = self.store.prepare_retry_failed();
        self.reissue(tracks).await
    }

    /// Retry one failed track.
    pub async fn retry_single_track(&self, track_id: &str) -> CommandOutcome {
        if !self.begin() {
            return CommandOutcome::Skipped;
        }
        let tracks: Vec<Track> = self
            .store
            .prepare_retry_single(track_id)
            .into_iter()
            .collect();
        self.reissue(tracks).await
    }

    fn begin(&self) -> bool {
        if !self.can_retry() {
            warn!("Retry not possible right now");
            return false;
        }
        self.store.set_retrying(true);
        self.store.set_initializing(true);
        true
    }

    async fn reissue(&self, tracks: Vec<Track>) -> CommandOutcome {
        if tracks.is_empty() {
            self.store.set_retrying(false);
            self.store.set_initializing(false);
            return CommandOutcome::Skipped;
        }

        let output_dir = self.store.read(|state| state.output_dir.clone());
        let request =
            StartQueueRequest::new(&tracks, &self.track_url_template).with_output_dir(output_dir);
        info!("Retrying {} tracks", tracks.len());

        match self.backend.start_queue(request).await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                error!("Failed to retry: {}", e);
                self.store.set_retrying(false);
                self.store.set_initializing(false);
                CommandOutcome::Rejected(e.to_string())
            }
        }
    }
}
