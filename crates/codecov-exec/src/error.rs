//! Error types for the uploader pipeline

use thiserror::Error;

use crate::stage::StageCommand;

/// Errors that can occur while provisioning or driving the uploader
#[derive(Error, Debug)]
pub enum CodecovError {
    /// Downloading the uploader or its checksum failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("Download of {url} failed with status {status}")]
    DownloadStatus { url: String, status: u16 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Published checksum does not match the downloaded bytes
    #[error("Uploader shasum does not match: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Checksum file was empty or unreadable
    #[error("Checksum file at {0} did not contain a SHA-256 digest")]
    MissingChecksum(String),

    /// Requested platform is not one the uploader is published for
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The uploader process could not be spawned or awaited
    #[error("Failed to run {command}: {source}")]
    StageSpawn {
        command: StageCommand,
        #[source]
        source: std::io::Error,
    },

    /// The uploader binary could not be removed after the run
    #[error("Could not unlink uploader: {0}")]
    Cleanup(String),

    /// The CI event payload could not be parsed
    #[error("Invalid event payload: {0}")]
    EventPayload(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CodecovError {
    fn from(err: reqwest::Error) -> Self {
        CodecovError::Http(err.to_string())
    }
}

/// Result type for uploader operations
pub type Result<T> = std::result::Result<T, CodecovError>;
