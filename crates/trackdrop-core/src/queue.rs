//! Download queue state container.
//!
//! [`QueueStore`] is the single authoritative store for the track list and all
//! derived counters and flags of the current queue generation. Every operation
//! is a synchronous, atomic mutation of the state held in a
//! [`tokio::sync::watch`] channel, so observers get a consistent
//! [`QueueState`] snapshot after each effective change. Operations never fail:
//! unknown ids and "nothing to do" cases are no-ops, because a stale or
//! duplicated backend event must never take the session down.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{QueueCancelledEvent, QueueCompleteEvent};
use crate::track::{Track, TrackError, TrackStatus};

/// Snapshot of the queue for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Tracks in processing order.
    pub tracks: Vec<Track>,
    /// 0-indexed position of the track being processed; meaningful while processing.
    pub current_index: u32,
    /// Live total; the backend's value wins once processing starts.
    pub total_tracks: u32,
    /// The backend has reported progress and no terminal event arrived yet.
    pub is_processing: bool,
    /// A start was issued and no progress has been reported yet.
    pub is_initializing: bool,
    /// A terminal event arrived for this generation.
    pub is_complete: bool,
    /// A cancel command is in flight.
    pub is_cancelling: bool,
    /// The generation ended through cancellation.
    pub is_cancelled: bool,
    /// A retry run is being started or is in progress.
    pub is_retrying: bool,
    /// Final completed tally, valid once complete.
    pub completed_count: u32,
    /// Final failed tally, valid once complete.
    pub failed_count: u32,
    /// Final cancelled tally, valid once cancelled.
    pub cancelled_count: u32,
    /// The backend is currently throttled.
    pub is_rate_limited: bool,
    /// Unix millis of the most recent rate-limit detection.
    pub rate_limited_at: Option<u64>,
    /// Output directory used for the current or most recent run.
    pub output_dir: Option<PathBuf>,
}

impl QueueState {
    /// Find a track by id.
    #[must_use]
    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.id == id)
    }

    /// Whether the queue holds no tracks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks currently in the `failed` status.
    pub fn failed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|track| track.is_failed())
    }

    /// Return every processing, completion and rate-limit field to its initial value.
    fn reset_progress(&mut self) {
        self.current_index = 0;
        self.is_processing = false;
        self.is_initializing = false;
        self.is_complete = false;
        self.is_cancelling = false;
        self.is_cancelled = false;
        self.is_retrying = false;
        self.completed_count = 0;
        self.failed_count = 0;
        self.cancelled_count = 0;
        self.is_rate_limited = false;
        self.rate_limited_at = None;
        self.output_dir = None;
    }
}

/// Shared handle to the queue state container.
///
/// Cloning the handle shares the same underlying state.
#[derive(Debug, Clone)]
pub struct QueueStore {
    state: Arc<watch::Sender<QueueState>>,
}

impl QueueStore {
    /// Create a store holding an empty generation.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(QueueState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Clone the current state.
    #[must_use]
    pub fn snapshot(&self) -> QueueState {
        self.state.borrow().clone()
    }

    /// Read the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&QueueState) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Observe the state; the receiver is notified after every effective mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state.subscribe()
    }

    /// Start a new generation with `tracks`. Does not start processing.
    pub fn enqueue_tracks(&self, tracks: Vec<Track>) {
        info!("Enqueueing {} tracks", tracks.len());
        let tracks: Vec<Track> = tracks
            .into_iter()
            .map(|mut track| {
                let error = track.error.take();
                track.apply_status(track.status, error);
                track
            })
            .collect();

        self.state.send_modify(|state| {
            state.reset_progress();
            state.total_tracks = count_u32(tracks.len());
            state.tracks = tracks;
        });
    }

    /// Replace a track's status and error. Unknown ids are ignored.
    ///
    /// A track only returns to `pending` through retry preparation, so a
    /// `pending` update for a track that has moved on is ignored. Returns
    /// whether the track changed.
    pub fn update_track_status(
        &self,
        id: &str,
        status: TrackStatus,
        error: Option<TrackError>,
    ) -> bool {
        match &error {
            Some(e) => debug!("Track {} status: {} (error: {})", id, status, e.code),
            None => debug!("Track {} status: {}", id, status),
        }

        self.state.send_if_modified(|state| {
            let terminal = state.is_complete;
            let Some(track) = state.track_mut(id) else {
                debug!("Ignoring status for unknown track {}", id);
                return false;
            };
            if status == TrackStatus::Pending && track.status != TrackStatus::Pending {
                debug!("Ignoring pending status for track {} ({})", id, track.status);
                return false;
            }
            if terminal {
                debug!("Applying straggler status {} for track {}", status, id);
            }
            let before = (track.status, track.error.clone());
            track.apply_status(status, error);
            before != (track.status, track.error.clone())
        })
    }

    /// Record backend queue progress; `current` is 1-indexed.
    ///
    /// This is the only operation that turns processing on.
    pub fn set_queue_progress(&self, current: u32, total: u32) {
        debug!("Queue progress: {}/{}", current, total);
        self.state.send_modify(|state| {
            let upper = total.max(1);
            let position = current.max(1);
            if current == 0 || position > upper {
                warn!(
                    "Queue progress {}/{} out of range, clamping position",
                    current, total
                );
            }
            if total != count_u32(state.tracks.len()) {
                debug!(
                    "Backend total {} differs from {} queued tracks",
                    total,
                    state.tracks.len()
                );
            }

            state.current_index = position.min(upper) - 1;
            state.total_tracks = total;
            state.is_processing = true;
            state.is_initializing = false;
        });
    }

    /// Terminal success or partial-failure transition.
    pub fn set_queue_complete(&self, result: &QueueCompleteEvent) {
        info!(
            "Queue complete: {} completed, {} failed",
            result.completed, result.failed
        );
        for (track_id, message) in &result.failed_tracks {
            debug!("Track {} failed: {}", track_id, message);
        }

        self.state.send_modify(|state| {
            let tallied = result.completed.saturating_add(result.failed);
            if tallied > result.total {
                warn!(
                    "Queue complete tallies {} exceed total {}",
                    tallied, result.total
                );
            }

            state.is_processing = false;
            state.is_initializing = false;
            state.is_complete = true;
            state.is_cancelling = false;
            state.is_retrying = false;
            state.completed_count = result.completed;
            state.failed_count = result.failed;
            state.total_tracks = result.total.max(tallied);
        });
    }

    /// Terminal cancellation transition.
    pub fn set_queue_cancelled(&self, result: &QueueCancelledEvent) {
        info!(
            "Queue cancelled: {} completed, {} cancelled",
            result.completed, result.cancelled
        );
        self.state.send_modify(|state| {
            state.is_processing = false;
            state.is_initializing = false;
            state.is_complete = true;
            state.is_cancelling = false;
            state.is_cancelled = true;
            state.is_retrying = false;
            state.completed_count = result.completed;
            state.cancelled_count = result.cancelled;
            let tallied = result.completed.saturating_add(state.failed_count);
            state.total_tracks = state.total_tracks.max(tallied);
        });
    }

    /// Return to the empty generation.
    pub fn clear_queue(&self) {
        info!("Clearing queue");
        self.state.send_modify(|state| {
            state.tracks.clear();
            state.total_tracks = 0;
            state.reset_progress();
        });
    }

    /// Set or clear the rate-limit signal, stamping the detection time.
    pub fn set_rate_limited(&self, limited: bool) {
        if limited {
            warn!("Rate limited by backend");
        }
        self.state.send_if_modified(|state| {
            if !limited && !state.is_rate_limited && state.rate_limited_at.is_none() {
                return false;
            }
            state.is_rate_limited = limited;
            state.rate_limited_at = limited.then(now_millis);
            true
        });
    }

    /// Set the optimistic cancelling flag.
    pub fn set_cancelling(&self, cancelling: bool) {
        info!("Cancelling: {}", cancelling);
        self.set_flag(|state| &mut state.is_cancelling, cancelling);
    }

    /// Set the initializing flag.
    pub fn set_initializing(&self, initializing: bool) {
        debug!("Initializing: {}", initializing);
        self.set_flag(|state| &mut state.is_initializing, initializing);
    }

    /// Set the retrying flag.
    pub fn set_retrying(&self, retrying: bool) {
        debug!("Retrying: {}", retrying);
        self.set_flag(|state| &mut state.is_retrying, retrying);
    }

    /// Record the output directory used for the run.
    pub fn set_output_dir(&self, path: Option<PathBuf>) {
        match &path {
            Some(dir) => debug!("Output dir: {}", dir.display()),
            None => debug!("Output dir: default"),
        }
        self.state.send_if_modified(|state| {
            if state.output_dir == path {
                return false;
            }
            state.output_dir = path;
            true
        });
    }

    fn set_flag(&self, field: impl FnOnce(&mut QueueState) -> &mut bool, value: bool) {
        self.state.send_if_modified(|state| {
            let flag = field(state);
            let changed = *flag != value;
            *flag = value;
            changed
        });
    }

    /// Re-arm every failed track.
    ///
    /// Returns the failed tracks as they were before the reset, or an empty
    /// list (and no mutation) when nothing failed.
    pub fn prepare_retry_failed(&self) -> Vec<Track> {
        let mut snapshot = Vec::new();
        self.state.send_if_modified(|state| {
            snapshot = state.failed_tracks().cloned().collect();
            if snapshot.is_empty() {
                return false;
            }
            for track in state.tracks.iter_mut().filter(|track| track.is_failed()) {
                track.reset_to_pending();
            }
            state.is_complete = false;
            state.is_cancelled = false;
            state.failed_count = 0;
            true
        });

        if snapshot.is_empty() {
            warn!("No failed tracks to retry");
        } else {
            info!("Preparing retry for {} failed tracks", snapshot.len());
        }
        snapshot
    }

    /// Re-arm a single failed track.
    ///
    /// Returns the track as it was before the reset, or `None` when it is
    /// unknown or not failed.
    pub fn prepare_retry_single(&self, track_id: &str) -> Option<Track> {
        let mut snapshot = None;
        self.state.send_if_modified(|state| {
            let Some(track) = state.track_mut(track_id).filter(|track| track.is_failed()) else {
                return false;
            };
            snapshot = Some(track.clone());
            track.reset_to_pending();
            state.is_complete = false;
            state.is_cancelled = false;
            state.failed_count = state.failed_count.saturating_sub(1);
            true
        });

        match &snapshot {
            Some(track) => info!("Preparing retry for track: {}", track.title),
            None => warn!("Track {} not found or not failed", track_id),
        }
        snapshot
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturating `usize` to `u32` for track counts.
pub(crate) fn count_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
