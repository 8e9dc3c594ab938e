use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the media queue.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueueError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Failed to acquire manifest lock within {0:?}")]
    LockTimeout(Duration),

    #[error("Media file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Request id already queued: {0}")]
    DuplicateRequest(String),

    #[error("{0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue worker has stopped")]
    WorkerStopped,

    #[cfg(feature = "http")]
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl QueueError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
