//! Outbound command boundary with the execution backend.
//!
//! The backend downloads and transcodes tracks in its own process; this crate
//! only asks it to start a queue run or cancel the current one. Both commands
//! resolve to a bare acknowledgement, and progress flows back through the
//! event channels in [`crate::events`].

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::track::{Track, TrackId};

/// Default template for synthesizing a resolvable track URL from its id.
pub const DEFAULT_TRACK_URL_TEMPLATE: &str = "https://api.soundcloud.com/tracks/{id}";

/// Placeholder replaced by the track id in a URL template.
pub const TRACK_ID_PLACEHOLDER: &str = "{id}";

/// Build the track URL for `track_id` from `template`.
///
/// A template without the placeholder gets the id appended as a path segment.
#[must_use]
pub fn track_url(template: &str, track_id: &str) -> String {
    if template.contains(TRACK_ID_PLACEHOLDER) {
        template.replace(TRACK_ID_PLACEHOLDER, track_id)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), track_id)
    }
}

/// A single track in a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemRequest {
    /// URL the backend resolves to fetch the audio.
    pub track_url: String,
    /// Track id echoed back in progress events.
    pub track_id: TrackId,
    /// Title used for tagging.
    pub title: String,
    /// Artist used for tagging.
    pub artist: String,
    /// Artwork to embed, if any.
    pub artwork_url: Option<String>,
}

impl QueueItemRequest {
    /// Build the request entry for a queued track.
    #[must_use]
    pub fn from_track(track: &Track, url_template: &str) -> Self {
        Self {
            track_url: track_url(url_template, &track.id),
            track_id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            artwork_url: track.artwork_url.clone(),
        }
    }
}

/// Payload of the start command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQueueRequest {
    /// Tracks to process, in order.
    pub tracks: Vec<QueueItemRequest>,
    /// Album tag for collections; `None` for single tracks and retries.
    pub album_name: Option<String>,
    /// Destination directory; `None` lets the backend pick its default.
    pub output_dir: Option<PathBuf>,
}

impl StartQueueRequest {
    /// Build a request for `tracks`.
    #[must_use]
    pub fn new<'a>(tracks: impl IntoIterator<Item = &'a Track>, url_template: &str) -> Self {
        Self {
            tracks: tracks
                .into_iter()
                .map(|track| QueueItemRequest::from_track(track, url_template))
                .collect(),
            album_name: None,
            output_dir: None,
        }
    }

    /// Set the album name.
    #[must_use]
    pub fn with_album_name(mut self, name: Option<String>) -> Self {
        self.album_name = name;
        self
    }

    /// Set the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }
}

/// Command interface of the execution backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Ask the backend to process `request` sequentially.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the run.
    async fn start_queue(&self, request: StartQueueRequest) -> Result<()>;

    /// Ask the backend to stop the current run.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the cancellation.
    async fn cancel_queue(&self) -> Result<()>;
}
