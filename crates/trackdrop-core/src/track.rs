//! Track model: the unit of work in a download queue and its status lifecycle.

use serde::{Deserialize, Serialize};

/// Opaque track identifier, unique within a queue generation.
pub type TrackId = String;

/// Processing status of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Waiting to be processed.
    #[default]
    Pending,
    /// Audio is being fetched.
    Downloading,
    /// Audio is being transcoded.
    Converting,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Backend is throttled and will retry this track.
    RateLimited,
}

impl TrackStatus {
    /// Whether the backend is actively working on the track.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Converting)
    }

    /// Whether the track reached an end state for this run.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Converting => write!(f, "converting"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Closed set of error kinds reported by the execution backend.
///
/// Codes outside the set decode as [`ErrorCode::DownloadFailed`] so that a
/// new backend error never causes the whole progress event to be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum ErrorCode {
    /// Track is not available in the user's region.
    GeoBlocked,
    /// Backend is being throttled.
    RateLimited,
    /// Network failure while downloading.
    NetworkError,
    /// Download failed for another reason.
    DownloadFailed,
    /// Transcoding failed.
    ConversionFailed,
    /// The track URL could not be resolved.
    InvalidUrl,
    /// The track needs an authenticated session.
    AuthRequired,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeoBlocked => "GEO_BLOCKED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::ConversionFailed => "CONVERSION_FAILED",
            Self::InvalidUrl => "INVALID_URL",
            Self::AuthRequired => "AUTH_REQUIRED",
        }
    }

    /// Parse a wire code, returning `None` for codes outside the set.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "GEO_BLOCKED" => Some(Self::GeoBlocked),
            "RATE_LIMITED" => Some(Self::RateLimited),
            "NETWORK_ERROR" => Some(Self::NetworkError),
            "DOWNLOAD_FAILED" => Some(Self::DownloadFailed),
            "CONVERSION_FAILED" => Some(Self::ConversionFailed),
            "INVALID_URL" => Some(Self::InvalidUrl),
            "AUTH_REQUIRED" => Some(Self::AuthRequired),
            _ => None,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::parse(&code).unwrap_or(Self::DownloadFailed)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackError {
    /// Error kind.
    pub code: ErrorCode,
    /// Backend-provided message, not localized.
    pub message: String,
}

impl TrackError {
    /// Create a new track error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error used when the backend reports `failed` without details.
    #[must_use]
    pub fn unspecified() -> Self {
        Self::new(ErrorCode::DownloadFailed, "Download failed")
    }
}

/// A queued track.
///
/// `error` is present if and only if `status` is [`TrackStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Stable identifier.
    pub id: TrackId,
    /// Display title.
    pub title: String,
    /// Display artist.
    pub artist: String,
    /// Optional artwork URL, only written at enqueue time.
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// Current status.
    #[serde(default)]
    pub status: TrackStatus,
    /// Failure details, set only while failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TrackError>,
}

impl Track {
    /// Create a pending track.
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            artwork_url: None,
            status: TrackStatus::Pending,
            error: None,
        }
    }

    /// Set the artwork URL.
    #[must_use]
    pub fn with_artwork_url(mut self, url: impl Into<String>) -> Self {
        self.artwork_url = Some(url.into());
        self
    }

    /// Whether the track is currently failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, TrackStatus::Failed)
    }

    /// Replace status and error, keeping the error/status invariant.
    pub(crate) fn apply_status(&mut self, status: TrackStatus, error: Option<TrackError>) {
        self.status = status;
        self.error = match status {
            TrackStatus::Failed => Some(error.unwrap_or_else(TrackError::unspecified)),
            _ => None,
        };
    }

    /// Re-arm a track for another attempt.
    pub(crate) fn reset_to_pending(&mut self) {
        self.status = TrackStatus::Pending;
        self.error = None;
    }
}

/// Track metadata as returned by the media lookup, before it is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    /// Identifier.
    pub id: TrackId,
    /// Title.
    pub title: String,
    /// Uploader display name.
    pub artist: String,
    /// Artwork URL, if any.
    #[serde(default)]
    pub artwork_url: Option<String>,
}

impl From<TrackInfo> for Track {
    fn from(info: TrackInfo) -> Self {
        Self {
            id: info.id,
            title: info.title,
            artist: info.artist,
            artwork_url: info.artwork_url,
            status: TrackStatus::Pending,
            error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TrackStatus::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let status: TrackStatus = serde_json::from_str("\"converting\"").unwrap();
        assert_eq!(status, TrackStatus::Converting);
    }

    #[test]
    fn test_status_predicates() {
        assert!(TrackStatus::Downloading.is_active());
        assert!(TrackStatus::Converting.is_active());
        assert!(!TrackStatus::RateLimited.is_active());
        assert!(TrackStatus::Complete.is_finished());
        assert!(TrackStatus::Failed.is_finished());
        assert!(!TrackStatus::Pending.is_finished());
    }

    #[test]
    fn test_error_code_known_and_unknown() {
        let code: ErrorCode = serde_json::from_str("\"GEO_BLOCKED\"").unwrap();
        assert_eq!(code, ErrorCode::GeoBlocked);

        let code: ErrorCode = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(code, ErrorCode::DownloadFailed);

        assert_eq!(
            serde_json::to_string(&ErrorCode::AuthRequired).unwrap(),
            "\"AUTH_REQUIRED\""
        );
    }

    #[test]
    fn test_apply_status_keeps_error_invariant() {
        let mut track = Track::new("1", "Song", "Artist");

        track.apply_status(
            TrackStatus::Downloading,
            Some(TrackError::new(ErrorCode::NetworkError, "stale")),
        );
        assert_eq!(track.status, TrackStatus::Downloading);
        assert!(track.error.is_none());

        track.apply_status(TrackStatus::Failed, None);
        assert!(track.is_failed());
        assert_eq!(track.error.as_ref().unwrap().code, ErrorCode::DownloadFailed);

        track.reset_to_pending();
        assert_eq!(track.status, TrackStatus::Pending);
        assert!(track.error.is_none());
    }

    #[test]
    fn test_track_serializes_camel_case_without_error() {
        let track = Track::new("42", "Title", "Artist").with_artwork_url("https://img/42.jpg");
        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["artworkUrl"], "https://img/42.jpg");
        assert_eq!(value["status"], "pending");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_track_from_info_is_pending() {
        let info = TrackInfo {
            id: "7".to_string(),
            title: "Seven".to_string(),
            artist: "Someone".to_string(),
            artwork_url: None,
        };
        let track = Track::from(info);
        assert_eq!(track.id, "7");
        assert_eq!(track.status, TrackStatus::Pending);
        assert!(track.error.is_none());
    }
}
