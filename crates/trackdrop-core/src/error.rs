//! Error types for Trackdrop core operations.
//!
//! Queue container mutations are total and never fail; errors only come from
//! the edges of the crate: backend commands, inbound event decoding,
//! configuration and logging setup.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error category for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The execution backend refused or failed a command.
    Backend,
    /// An inbound event payload could not be decoded.
    Event,
    /// Invalid or unreadable configuration.
    Configuration,
    /// File system failure.
    FileSystem,
    /// JSON (de)serialization failure.
    Serialization,
}

/// Errors that can occur in Trackdrop core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend rejected a command (start or cancel).
    #[error("Backend rejected {command}: {reason}")]
    CommandRejected {
        /// Name of the rejected command.
        command: &'static str,
        /// Reason reported by the backend.
        reason: String,
    },

    /// An event payload did not match the channel's schema.
    #[error("Failed to decode '{channel}' event: {source}")]
    EventDecode {
        /// Channel the payload arrived on.
        channel: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a command rejection error.
    pub fn rejected(command: &'static str, reason: impl Into<String>) -> Self {
        Self::CommandRejected {
            command,
            reason: reason.into(),
        }
    }

    /// Get the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandRejected { .. } => ErrorKind::Backend,
            Self::EventDecode { .. } => ErrorKind::Event,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::FileSystem { .. } | Self::Io(_) => ErrorKind::FileSystem,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether issuing the same operation again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Backend | ErrorKind::FileSystem)
    }
}
