//! Error types for Playgate Core

use thiserror::Error;

/// Result type alias for authorization and playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Authorization and playback error types
#[derive(Error, Debug)]
pub enum Error {
    // Entitlement service errors
    #[error("Entitlement call failed with HTTP status {status}")]
    Transport { status: u16 },

    #[error("Entitlement service rejected the request (status {status}): {message}")]
    Entitlement {
        /// Service-level status from the error body, not the HTTP status line
        status: u16,
        business_code: Option<String>,
        message: String,
    },

    #[error(
        "You have reached your maximum allowed concurrent devices. To enjoy your favorite \
         contents on this device, you need to stop playback in another device first."
    )]
    ConcurrencyLimit,

    // Content metadata errors
    #[error("{content_type} {content_id} was not found")]
    ContentNotFound {
        content_type: String,
        content_id: String,
    },

    #[error("Shows are NOT playable; please try with an episode, movie or live event instead")]
    ContentNotPlayable,

    // Configuration errors
    #[error("Specified player type '{requested}' unknown. Supported values: {supported}")]
    UnknownPlayerType { requested: String, supported: String },

    // Lifecycle errors
    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Session cache errors
    #[error("Session cache error: {0}")]
    Cache(String),

    // Underlying transport/serialization failures
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for transient upstream failures (bad gateway / gateway timeout)
    /// that warrant retrying the same startPlayback call.
    pub fn is_gateway(&self) -> bool {
        matches!(self, Error::Transport { status: 502 | 504 })
    }

    /// True when the service reports the mak as expired (301, "token out of
    /// phase") or invalid (519, "unauthorized subscriber"), requiring a fresh
    /// startup call.
    pub fn is_mak_rejected(&self) -> bool {
        matches!(self, Error::Entitlement { status: 301 | 519, .. })
    }

    /// Returns a stable code for structured logging
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Transport { .. } => "TRANSPORT",
            Error::Entitlement { .. } => "ENTITLEMENT",
            Error::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Error::ContentNotFound { .. } => "CONTENT_NOT_FOUND",
            Error::ContentNotPlayable => "CONTENT_NOT_PLAYABLE",
            Error::UnknownPlayerType { .. } => "UNKNOWN_PLAYER_TYPE",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Cache(_) => "CACHE",
            Error::Http(_) => "NETWORK",
            Error::Json(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }
}
