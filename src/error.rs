//! Error types for the handsfree controller

use thiserror::Error;

/// Result type alias for handsfree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running voice turns
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone or recognizer access was denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Captured audio was empty or below the sanity threshold
    #[error("recording too short ({bytes} bytes, need at least {minimum})")]
    CaptureTooShort {
        /// Size of the assembled recording
        bytes: usize,
        /// Configured minimum size
        minimum: usize,
    },

    /// Capture session error
    #[error("capture error: {0}")]
    Capture(String),

    /// Submission endpoint rejected the request or was unreachable
    #[error("submission error: {0}")]
    Submission(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Message suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::CaptureTooShort { .. } => {
                "Recording too short! Please say a few words.".to_string()
            }
            Self::Permission(_) => {
                "Please allow microphone access to use this feature.".to_string()
            }
            Self::Submission(msg) => format!("Error: {msg}"),
            other => format!("Error: {other}"),
        }
    }
}
