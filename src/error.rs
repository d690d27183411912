//! Error types for the drive_fetch crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving or downloading Drive files.
///
/// Per-transfer outcomes such as rate-limit exhaustion or cancellation are
/// not errors; they are reported through [`crate::transfer::TransferStatus`].
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid URL or ID: {0}")]
    InvalidUrlOrId(String),

    #[error("Cannot write destination {}: {source}", path.display())]
    DestinationError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Local I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidConfig { name: &'static str, value: String },
}

impl FetchError {
    /// Wrap an I/O error raised while touching the destination path.
    pub fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::DestinationError {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for FetchError.
pub type Result<T> = std::result::Result<T, FetchError>;
