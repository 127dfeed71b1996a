//! `Trackdrop` Core Library
//!
//! This crate provides the client-side core of a track download queue whose
//! actual downloading and transcoding happens in a separate backend:
//! - Queue state container with atomic, never-failing mutations
//! - Event synchronization from backend channels into the queue
//! - Download flow (start, cancel, reset) and retry controllers
//! - Pure progress and completion projections
//! - Application configuration and logging setup
//!
//! # Error Handling
//!
//! Queue mutations are total. Only the backend boundary, event decoding and
//! configuration return [`Result`]; see the [`error`] module.
//!
//! ```rust,ignore
//! use trackdrop_core::{AppConfig, DownloadSession};
//!
//! let session = DownloadSession::new(&AppConfig::load()?, backend);
//! session.attach();
//! session.flow().load_media(media);
//! session.flow().start_download(None).await;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod session;
pub mod sync;
pub mod track;

pub use backend::{QueueBackend, QueueItemRequest, StartQueueRequest, track_url};
pub use config::{AppConfig, ConfigManager};
pub use error::{Error, ErrorKind, Result};
pub use events::{
    BackendEvent, Channel, DownloadProgressEvent, EventHub, Listener, QueueCancelledEvent,
    QueueCompleteEvent, QueueProgressEvent,
};
pub use flow::{CommandOutcome, FlowController, FlowPhase, MediaSource};
pub use logging::{LogRotation, LoggingConfig, LoggingError, LoggingGuard};
pub use progress::{
    CompletionSummary, FailedTrack, FailureReason, OverallProgress, RateLimitStatus,
    group_failures_by_reason,
};
pub use queue::{QueueState, QueueStore};
pub use retry::RetryController;
pub use session::DownloadSession;
pub use sync::EventSynchronizer;
pub use track::{ErrorCode, Track, TrackError, TrackId, TrackInfo, TrackStatus};
