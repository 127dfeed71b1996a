//! Flow controller: the user-facing download lifecycle.
//!
//! The phase is derived from the [`QueueStore`] alone. The "pending" window
//! between issuing a start command and the first queue progress event is the
//! store's `is_initializing` flag, which every start, progress, terminal event
//! and rollback keeps current.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{DEFAULT_TRACK_URL_TEMPLATE, QueueBackend, StartQueueRequest};
use crate::queue::{QueueState, QueueStore};
use crate::track::{Track, TrackInfo};

/// Result of a command issued by a controller.
///
/// Rejections are already logged and rolled back when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The backend acknowledged the command.
    Issued,
    /// Nothing to do; no command was sent.
    Skipped,
    /// The backend refused the command.
    Rejected(String),
}

impl CommandOutcome {
    /// Whether the command reached and was accepted by the backend.
    #[must_use]
    pub const fn is_issued(&self) -> bool {
        matches!(self, Self::Issued)
    }
}

/// Media resolved from a user-entered URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    /// A collection; its title becomes the album tag.
    Playlist {
        /// Collection title.
        title: String,
        /// Tracks in collection order.
        tracks: Vec<TrackInfo>,
    },
    /// A single track.
    Track(TrackInfo),
}

impl MediaSource {
    /// Album name for the start command.
    #[must_use]
    pub fn album_name(&self) -> Option<&str> {
        match self {
            Self::Playlist { title, .. } => Some(title),
            Self::Track(_) => None,
        }
    }

    /// Queue entries for this media, all pending.
    #[must_use]
    pub fn to_tracks(&self) -> Vec<Track> {
        match self {
            Self::Playlist { tracks, .. } => tracks.iter().cloned().map(Track::from).collect(),
            Self::Track(info) => vec![Track::from(info.clone())],
        }
    }
}

/// Lifecycle phase as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    /// Nothing started.
    Idle,
    /// Start issued, no progress yet.
    Pending,
    /// Backend reported progress.
    Processing,
    /// A terminal event arrived.
    Complete,
}

#[derive(Debug, Default)]
struct Source {
    url: String,
    media: Option<MediaSource>,
}

/// Drives load, start, cancel and reset of a download run.
pub struct FlowController {
    store: QueueStore,
    backend: Arc<dyn QueueBackend>,
    download_directory: Option<PathBuf>,
    track_url_template: String,
    source: Mutex<Source>,
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("download_directory", &self.download_directory)
            .field("track_url_template", &self.track_url_template)
            .finish_non_exhaustive()
    }
}

impl FlowController {
    /// Create a controller writing to `store` and commanding `backend`.
    #[must_use]
    pub fn new(store: QueueStore, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            store,
            backend,
            download_directory: None,
            track_url_template: DEFAULT_TRACK_URL_TEMPLATE.to_string(),
            source: Mutex::new(Source::default()),
        }
    }

    /// Default output directory used when no override is given.
    #[must_use]
    pub fn with_download_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.download_directory = dir;
        self
    }

    /// Template used to build track URLs.
    #[must_use]
    pub fn with_track_url_template(mut self, template: impl Into<String>) -> Self {
        self.track_url_template = template.into();
        self
    }

    fn source(&self) -> MutexGuard<'_, Source> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the URL the user entered.
    pub fn set_source_url(&self, url: impl Into<String>) {
        self.source().url = url.into();
    }

    /// The URL the user entered, empty after a reset.
    #[must_use]
    pub fn source_url(&self) -> String {
        self.source().url.clone()
    }

    /// The media currently loaded, if any.
    #[must_use]
    pub fn media(&self) -> Option<MediaSource> {
        self.source().media.clone()
    }

    /// Queue the tracks of `media` as a new generation.
    pub fn load_media(&self, media: MediaSource) {
        let tracks = media.to_tracks();
        info!(
            "Loaded {} tracks{}",
            tracks.len(),
            media
                .album_name()
                .map(|name| format!(" from '{name}'"))
                .unwrap_or_default()
        );
        self.store.enqueue_tracks(tracks);
        self.source().media = Some(media);
    }

    /// Start processing the current queue.
    ///
    /// The resolved output directory is stored even when the queue is empty.
    pub async fn start_download(&self, output_dir: Option<PathBuf>) -> CommandOutcome {
        let output_dir = output_dir.or_else(|| self.download_directory.clone());
        self.store.set_output_dir(output_dir.clone());

        let tracks = self.store.read(|state| state.tracks.clone());
        if tracks.is_empty() {
            warn!("No tracks to download");
            return CommandOutcome::Skipped;
        }

        let album_name = self
            .source()
            .media
            .as_ref()
            .and_then(|media| media.album_name().map(str::to_string));
        let request = StartQueueRequest::new(&tracks, &self.track_url_template)
            .with_album_name(album_name)
            .with_output_dir(output_dir);

        self.store.set_initializing(true);
        info!("Starting download of {} tracks", tracks.len());

        match self.backend.start_queue(request).await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                error!("Failed to start download: {}", e);
                self.store.set_initializing(false);
                CommandOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Ask the backend to stop the current run.
    ///
    /// `is_cancelling` is raised before the command and lowered again if the
    /// backend refuses.
    pub async fn cancel_download(&self) -> CommandOutcome {
        if self.store.read(|state| state.is_cancelling) {
            debug!("Cancellation already requested");
            return CommandOutcome::Skipped;
        }

        info!("Cancelling download");
        self.store.set_cancelling(true);
        match self.backend.cancel_queue().await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                error!("Failed to cancel download: {}", e);
                self.store.set_cancelling(false);
                CommandOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Drop the finished run and return to idle.
    pub fn download_another(&self) {
        self.store.clear_queue();
        let mut source = self.source();
        source.url.clear();
        source.media = None;
        debug!("Ready for another download");
    }

    /// Current phase of the store.
    #[must_use]
    pub fn phase(&self) -> FlowPhase {
        self.store.read(Self::phase_of)
    }

    /// Phase for a given snapshot, e.g. one received from a subscription.
    #[must_use]
    pub const fn phase_of(state: &QueueState) -> FlowPhase {
        if state.is_complete {
            FlowPhase::Complete
        } else if state.is_processing {
            FlowPhase::Processing
        } else if state.is_initializing {
            FlowPhase::Pending
        } else {
            FlowPhase::Idle
        }
    }

    /// Whether the pending window is open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.phase() == FlowPhase::Pending
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::MockQueueBackend;
    use crate::error::Error;
    use crate::events::{QueueCancelledEvent, QueueCompleteEvent};
    use crate::retry::RetryController;
    use crate::track::{ErrorCode, TrackError, TrackStatus};

    fn info(id: &str) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            title: format!("Track {id}"),
            artist: "Artist".to_string(),
            artwork_url: None,
        }
    }

    fn playlist(ids: &[&str]) -> MediaSource {
        MediaSource::Playlist {
            title: "Mixtape".to_string(),
            tracks: ids.iter().map(|id| info(id)).collect(),
        }
    }

    fn controller(mock: MockQueueBackend) -> FlowController {
        FlowController::new(QueueStore::new(), Arc::new(mock))
    }

    #[test]
    fn test_media_to_tracks() {
        let media = playlist(&["1", "2"]);
        assert_eq!(media.album_name(), Some("Mixtape"));
        let tracks = media.to_tracks();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.status == TrackStatus::Pending));

        let single = MediaSource::Track(info("9"));
        assert_eq!(single.album_name(), None);
        assert_eq!(single.to_tracks()[0].id, "9");
    }

    #[test]
    fn test_load_media_starts_new_generation() {
        let flow = controller(MockQueueBackend::new());
        flow.load_media(playlist(&["1", "2", "3"]));

        let state = flow.store.snapshot();
        assert_eq!(state.tracks.len(), 3);
        assert_eq!(state.total_tracks, 3);
        assert_eq!(flow.phase(), FlowPhase::Idle);
    }

    #[tokio::test]
    async fn test_start_download_issues_request() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue()
            .withf(|req| {
                req.tracks.len() == 2
                    && req.album_name.as_deref() == Some("Mixtape")
                    && req.output_dir == Some(PathBuf::from("/music"))
                    && req.tracks[0].track_url == "https://api.soundcloud.com/tracks/1"
            })
            .times(1)
            .returning(|_| Ok(()));

        let flow = controller(mock);
        flow.load_media(playlist(&["1", "2"]));
        let outcome = flow.start_download(Some(PathBuf::from("/music"))).await;

        assert_eq!(outcome, CommandOutcome::Issued);
        assert_eq!(flow.phase(), FlowPhase::Pending);
        let state = flow.store.snapshot();
        assert!(state.is_initializing);
        assert_eq!(state.output_dir, Some(PathBuf::from("/music")));
    }

    #[tokio::test]
    async fn test_single_track_has_no_album() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue()
            .withf(|req| req.album_name.is_none() && req.output_dir.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let flow = controller(mock);
        flow.load_media(MediaSource::Track(info("7")));
        assert!(flow.start_download(None).await.is_issued());
    }

    #[tokio::test]
    async fn test_configured_directory_is_fallback() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue()
            .withf(|req| req.output_dir == Some(PathBuf::from("/default")))
            .times(1)
            .returning(|_| Ok(()));

        let flow = controller(mock).with_download_directory(Some(PathBuf::from("/default")));
        flow.load_media(playlist(&["1"]));
        flow.start_download(None).await;
    }

    #[tokio::test]
    async fn test_empty_queue_is_skipped_but_stores_dir() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue().never();

        let flow = controller(mock);
        let outcome = flow.start_download(Some(PathBuf::from("/music"))).await;

        assert_eq!(outcome, CommandOutcome::Skipped);
        assert_eq!(flow.phase(), FlowPhase::Idle);
        assert_eq!(
            flow.store.snapshot().output_dir,
            Some(PathBuf::from("/music"))
        );
    }

    #[tokio::test]
    async fn test_rejected_start_rolls_back_pending() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue()
            .times(1)
            .returning(|_| Err(Error::rejected("start_queue", "busy")));

        let flow = controller(mock);
        flow.load_media(playlist(&["1", "2"]));
        let outcome = flow.start_download(None).await;

        assert!(matches!(outcome, CommandOutcome::Rejected(reason) if reason.contains("busy")));
        assert_eq!(flow.phase(), FlowPhase::Idle);
        let state = flow.store.snapshot();
        assert!(!state.is_initializing);
        assert!(state.tracks.iter().all(|t| t.status == TrackStatus::Pending));
        assert_eq!(state.failed_count, 0);
    }

    #[tokio::test]
    async fn test_phase_follows_store() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue().returning(|_| Ok(()));

        let flow = controller(mock);
        flow.load_media(playlist(&["1", "2"]));
        flow.start_download(None).await;
        assert_eq!(flow.phase(), FlowPhase::Pending);

        flow.store.set_queue_progress(1, 2);
        assert_eq!(flow.phase(), FlowPhase::Processing);

        flow.store.set_queue_complete(&QueueCompleteEvent {
            completed: 2,
            failed: 0,
            total: 2,
            failed_tracks: Vec::new(),
        });
        assert_eq!(flow.phase(), FlowPhase::Complete);
    }

    #[tokio::test]
    async fn test_phase_needs_no_observation_to_leave_pending() {
        let mut mock = MockQueueBackend::new();
        let mut starts = 0;
        mock.expect_start_queue().times(2).returning(move |_| {
            starts += 1;
            if starts == 1 {
                Ok(())
            } else {
                Err(Error::rejected("start_queue", "busy"))
            }
        });
        let backend: Arc<dyn QueueBackend> = Arc::new(mock);

        let store = QueueStore::new();
        let flow = FlowController::new(store.clone(), Arc::clone(&backend));
        let retry = RetryController::new(store.clone(), backend);
        flow.load_media(playlist(&["1", "2"]));
        flow.start_download(None).await;

        // Nobody looks at the phase while the run plays out.
        store.set_queue_progress(1, 2);
        store.update_track_status(
            "2",
            TrackStatus::Failed,
            Some(TrackError::new(ErrorCode::DownloadFailed, "boom")),
        );
        store.set_queue_complete(&QueueCompleteEvent {
            completed: 1,
            failed: 1,
            total: 2,
            failed_tracks: vec![("2".to_string(), "boom".to_string())],
        });
        let outcome = retry.retry_all_failed().await;

        assert!(matches!(outcome, CommandOutcome::Rejected(_)));
        let state = store.snapshot();
        assert!(!state.is_initializing);
        assert_eq!(FlowController::phase_of(&state), FlowPhase::Idle);
        assert_eq!(flow.phase(), FlowPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_download() {
        let mut mock = MockQueueBackend::new();
        mock.expect_cancel_queue().times(1).returning(|| Ok(()));

        let flow = controller(mock);
        flow.load_media(playlist(&["1"]));
        flow.store.set_queue_progress(1, 1);

        assert_eq!(flow.cancel_download().await, CommandOutcome::Issued);
        assert!(flow.store.snapshot().is_cancelling);

        // A second request while cancelling does not reach the backend.
        assert_eq!(flow.cancel_download().await, CommandOutcome::Skipped);

        flow.store.set_queue_cancelled(&QueueCancelledEvent {
            completed: 0,
            cancelled: 1,
            total: None,
        });
        let state = flow.store.snapshot();
        assert!(state.is_cancelled);
        assert!(!state.is_cancelling);
    }

    #[tokio::test]
    async fn test_rejected_cancel_rolls_back() {
        let mut mock = MockQueueBackend::new();
        mock.expect_cancel_queue()
            .times(1)
            .returning(|| Err(Error::rejected("cancel_queue", "no run")));

        let flow = controller(mock);
        flow.load_media(playlist(&["1"]));
        flow.store.set_queue_progress(1, 1);

        let outcome = flow.cancel_download().await;
        assert!(matches!(outcome, CommandOutcome::Rejected(_)));
        let state = flow.store.snapshot();
        assert!(!state.is_cancelling);
        assert!(!state.is_cancelled);
        assert!(state.is_processing);
    }

    #[tokio::test]
    async fn test_download_another_resets() {
        let mut mock = MockQueueBackend::new();
        mock.expect_start_queue().returning(|_| Ok(()));

        let flow = controller(mock);
        flow.set_source_url("https://soundcloud.com/someone/sets/mixtape");
        flow.load_media(playlist(&["1"]));
        flow.start_download(Some(PathBuf::from("/music"))).await;
        flow.store.set_queue_complete(&QueueCompleteEvent {
            completed: 1,
            failed: 0,
            total: 1,
            failed_tracks: Vec::new(),
        });

        flow.download_another();

        assert_eq!(flow.phase(), FlowPhase::Idle);
        assert!(flow.source_url().is_empty());
        assert!(flow.media().is_none());
        assert_eq!(flow.store.snapshot(), QueueState::default());
    }
}
