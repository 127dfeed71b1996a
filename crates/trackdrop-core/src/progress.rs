//! Read-side projections over a [`QueueState`] snapshot.
//!
//! Everything here is pure: recompute after each store notification.

use serde::{Deserialize, Serialize};

use crate::queue::{QueueState, count_u32};
use crate::track::{ErrorCode, TrackError, TrackId, TrackStatus};

/// Overall progress of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallProgress {
    /// Tracks in the queue.
    pub total_count: u32,
    /// Tracks literally in `complete`.
    pub completed_count: u32,
    /// `round(100 * completed / total)`, 0 for an empty queue.
    pub percentage: u8,
    /// Some track is downloading or converting.
    pub has_active_track: bool,
    /// Some track is still pending.
    pub has_pending_track: bool,
    /// Waiting for the next track to start.
    pub show_preparing: bool,
    /// There is work that can still be cancelled.
    pub show_cancel_button: bool,
}

impl OverallProgress {
    /// Compute progress from a snapshot.
    #[must_use]
    pub fn from_state(state: &QueueState) -> Self {
        let total_count = count_u32(state.tracks.len());
        let completed_count = count_status(state, TrackStatus::Complete);
        let has_active_track = state.tracks.iter().any(|track| track.status.is_active());
        let has_pending_track = state
            .tracks
            .iter()
            .any(|track| track.status == TrackStatus::Pending);

        Self {
            total_count,
            completed_count,
            percentage: percentage(completed_count, total_count),
            has_active_track,
            has_pending_track,
            show_preparing: !has_active_track && has_pending_track,
            show_cancel_button: has_active_track || has_pending_track,
        }
    }
}

/// Rounded completion percentage; 0 when `total` is 0.
#[must_use]
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = f64::from(completed.min(total)) / f64::from(total);
    (ratio * 100.0).round() as u8
}

fn count_status(state: &QueueState, status: TrackStatus) -> u32 {
    count_u32(
        state
            .tracks
            .iter()
            .filter(|track| track.status == status)
            .count(),
    )
}

/// Terminal summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    /// A terminal event arrived.
    pub is_complete: bool,
    /// Completed tally.
    pub completed_count: u32,
    /// Failed tally.
    pub failed_count: u32,
    /// Cancelled tally.
    pub cancelled_count: u32,
    /// Live total.
    pub total_count: u32,
    /// At least one track failed.
    pub has_failures: bool,
    /// Complete, nothing failed and not cancelled.
    pub is_full_success: bool,
    /// Ended by cancellation.
    pub is_cancelled: bool,
}

impl CompletionSummary {
    /// Compute the summary from a snapshot.
    #[must_use]
    pub const fn from_state(state: &QueueState) -> Self {
        Self {
            is_complete: state.is_complete,
            completed_count: state.completed_count,
            failed_count: state.failed_count,
            cancelled_count: state.cancelled_count,
            total_count: state.total_tracks,
            has_failures: state.failed_count > 0,
            is_full_success: state.is_complete && state.failed_count == 0 && !state.is_cancelled,
            is_cancelled: state.is_cancelled,
        }
    }
}

/// Rate-limit banner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    /// Currently throttled.
    pub is_rate_limited: bool,
    /// Unix millis of the latest detection.
    pub rate_limited_at: Option<u64>,
}

impl RateLimitStatus {
    /// Extract the rate-limit status from a snapshot.
    #[must_use]
    pub const fn from_state(state: &QueueState) -> Self {
        Self {
            is_rate_limited: state.is_rate_limited,
            rate_limited_at: state.rate_limited_at,
        }
    }
}

/// A failed track with its error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTrack {
    /// Track id.
    pub id: TrackId,
    /// Title.
    pub title: String,
    /// Artist.
    pub artist: String,
    /// Failure details.
    pub error: TrackError,
}

/// Failed tracks in queue order.
#[must_use]
pub fn failed_tracks(state: &QueueState) -> Vec<FailedTrack> {
    state
        .failed_tracks()
        .filter_map(|track| {
            track.error.clone().map(|error| FailedTrack {
                id: track.id.clone(),
                title: track.title.clone(),
                artist: track.artist.clone(),
                error,
            })
        })
        .collect()
}

/// Coarse failure category for grouping in a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Region restricted.
    GeoBlocked,
    /// Removed, private or otherwise gone.
    Unavailable,
    /// Connectivity problem.
    Network,
    /// Anything else.
    Other,
}

impl FailureReason {
    /// Categorize a track error.
    #[must_use]
    pub fn of(error: &TrackError) -> Self {
        match error.code {
            ErrorCode::GeoBlocked => Self::GeoBlocked,
            ErrorCode::NetworkError => Self::Network,
            ErrorCode::DownloadFailed => {
                let message = error.message.to_lowercase();
                if ["unavailable", "private", "removed"]
                    .iter()
                    .any(|needle| message.contains(needle))
                {
                    Self::Unavailable
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

/// Group failures by reason, keeping queue order inside each group.
///
/// Groups are ordered by first appearance.
#[must_use]
pub fn group_failures_by_reason(tracks: &[FailedTrack]) -> Vec<(FailureReason, Vec<FailedTrack>)> {
    let mut groups: Vec<(FailureReason, Vec<FailedTrack>)> = Vec::new();
    for track in tracks {
        let reason = FailureReason::of(&track.error);
        match groups.iter_mut().find(|(r, _)| *r == reason) {
            Some((_, members)) => members.push(track.clone()),
            None => groups.push((reason, vec![track.clone()])),
        }
    }
    groups
}
