//! Queue event notifications for the owning service.

use std::path::Path;

use tracing::{info, warn};

use crate::media::MediaType;

/// Receives queue lifecycle events.
///
/// Handed to the manager at construction. Methods are invoked from the
/// queue's worker task, so they should return quickly; every method defaults
/// to doing nothing.
pub trait MediaQueueCallback: Send + Sync {
    /// A file was copied into the queue and recorded in the manifest.
    fn on_media_queued(&self, _request_id: &str, _queued_path: &Path, _media_type: MediaType) {}

    /// An entry reached COMPLETED; its queued file has been deleted.
    fn on_media_uploaded(&self, _request_id: &str, _url: &str, _media_type: MediaType) {}

    /// An upload attempt failed; the entry is FAILED and awaits a retry.
    fn on_media_upload_failed(&self, _request_id: &str, _error: &str, _media_type: MediaType) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl MediaQueueCallback for NoopCallback {}

/// Reports every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl MediaQueueCallback for LoggingCallback {
    fn on_media_queued(&self, request_id: &str, queued_path: &Path, media_type: MediaType) {
        info!(request_id, media_type = %media_type, path = %queued_path.display(), "Media queued");
    }

    fn on_media_uploaded(&self, request_id: &str, url: &str, media_type: MediaType) {
        info!(request_id, media_type = %media_type, url, "Media uploaded");
    }

    fn on_media_upload_failed(&self, request_id: &str, error: &str, media_type: MediaType) {
        warn!(request_id, media_type = %media_type, error, "Media upload failed");
    }
}
