//! Common utility functions shared across CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{TimeZone, Utc};
use mediaq_core::{
    LoggingCallback, ManifestStore, MediaQueueManager, MediaStatus, QueueBuilder, QueueConfig,
    Uploader,
};
use tracing::debug;

/// Settings shared by every command.
pub struct Context {
    pub config: QueueConfig,
    pub quiet: bool,
}

impl Context {
    /// Environment configuration, with `--root` taking precedence.
    pub fn new(root: Option<PathBuf>, quiet: bool) -> Self {
        let mut config = QueueConfig::from_env();
        if let Some(root) = root {
            config.root_dir = root;
        }
        Self { config, quiet }
    }

    /// Lock-free view of the manifest. Nothing is created or rewritten, so
    /// it is safe next to a running uploader.
    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(
            self.config.layout(),
            self.config.lock_timeout,
            self.config.lock_poll_interval,
        )
    }

    /// Open the queue for maintenance; nothing is uploaded.
    pub async fn open_queue(&self) -> Result<MediaQueueManager> {
        let config = QueueConfig {
            process_on_enqueue: false,
            ..self.config.clone()
        };
        debug!(root = %config.root_dir.display(), "Opening queue");
        QueueBuilder::new(config)
            .open()
            .await
            .context("Failed to open media queue")
    }

    /// Open the queue with an uploader attached. This process owns uploading,
    /// so entries left UPLOADING by a previous run are queued again.
    pub async fn open_uploading_queue(
        &self,
        uploader: Arc<dyn Uploader>,
    ) -> Result<MediaQueueManager> {
        debug!(
            root = %self.config.root_dir.display(),
            uploader = uploader.name(),
            "Opening queue for upload"
        );
        QueueBuilder::new(self.config.clone())
            .recover_interrupted(true)
            .uploader(uploader)
            .callback(Arc::new(LoggingCallback))
            .open()
            .await
            .context("Failed to open media queue")
    }
}

/// Format a Unix timestamp (milliseconds) as a human-readable UTC string.
pub fn format_timestamp(timestamp_ms: u64) -> String {
    let secs = (timestamp_ms / 1000) as i64;
    let nsecs = ((timestamp_ms % 1000) * 1_000_000) as u32;
    match Utc.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => format!("{}ms", timestamp_ms),
    }
}

/// Fixed-width status label for list output.
pub fn status_label(status: MediaStatus) -> String {
    format!("{:<9}", status.to_string().to_uppercase())
}
