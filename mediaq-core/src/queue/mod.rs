//! The media queue manager.
//!
//! Stages captured files in a private directory and drives each one through
//! `queued -> uploading -> completed | failed`, recording every transition in
//! the manifest. Capture never waits on the network: `enqueue` only copies
//! and records, and uploads happen on the queue's own worker.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediaq_core::{LoggingCallback, MediaType, MockUploader, QueueBuilder, QueueConfig};
//!
//! # async fn example() -> mediaq_core::Result<()> {
//! let queue = QueueBuilder::new(QueueConfig::new("/var/lib/glasses"))
//!     .uploader(Arc::new(MockUploader::new()))
//!     .callback(Arc::new(LoggingCallback))
//!     .open()
//!     .await?;
//!
//! if queue.enqueue("/tmp/IMG_1.jpg", "r1", "camera", MediaType::Photo).await {
//!     println!("{} item(s) waiting", queue.queue_stats().await.queued_count);
//! }
//! # Ok(())
//! # }
//! ```

mod scheduler;
mod worker;

pub use scheduler::RetryScheduler;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::callback::{MediaQueueCallback, NoopCallback};
use crate::config::{BackoffPolicy, QueueConfig};
use crate::error::{QueueError, Result};
use crate::manifest::ManifestStore;
use crate::media::{now_millis, MediaEntry, MediaStatus, MediaType, QueueStats, DEFAULT_APP_ID};
use crate::uploader::Uploader;
use worker::{copy_synced, Job, Reply, Worker};

/// Builder for [`MediaQueueManager`].
pub struct QueueBuilder {
    config: QueueConfig,
    uploader: Option<Arc<dyn Uploader>>,
    callback: Arc<dyn MediaQueueCallback>,
    recover_interrupted: bool,
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            uploader: None,
            callback: Arc::new(NoopCallback),
            recover_interrupted: false,
        }
    }

    /// Uploader used for every dispatch. Without one the queue only stages
    /// media: processing leaves entries QUEUED.
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn callback(mut self, callback: Arc<dyn MediaQueueCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Put entries left UPLOADING back to QUEUED when the queue is opened.
    ///
    /// Only the process that owns uploading for this directory may set this:
    /// UPLOADING entries of a live uploader are in flight, and resetting them
    /// would drop its results and upload the files twice.
    pub fn recover_interrupted(mut self, recover: bool) -> Self {
        self.recover_interrupted = recover;
        self
    }

    /// Open (or create) the queue directory and start the worker.
    ///
    /// Must be called from within a tokio runtime. Existing entries are left
    /// as they are unless [`recover_interrupted`](Self::recover_interrupted)
    /// was set.
    pub async fn open(self) -> Result<MediaQueueManager> {
        let store = ManifestStore::new(
            self.config.layout(),
            self.config.lock_timeout,
            self.config.lock_poll_interval,
        );

        let manifest = store.initialize().await?;
        info!(
            dir = %store.layout().dir().display(),
            entries = manifest.media_items.len(),
            "Media queue opened"
        );

        if self.recover_interrupted {
            recover_interrupted(&store).await?;
        }

        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            store.clone(),
            self.uploader.clone(),
            Arc::clone(&self.callback),
            &jobs,
        );
        tokio::spawn(worker.run(rx));

        Ok(MediaQueueManager {
            config: self.config,
            store,
            jobs,
            callback: self.callback,
        })
    }
}

/// Reset every UPLOADING entry to QUEUED, returning how many were reset.
async fn recover_interrupted(store: &ManifestStore) -> Result<usize> {
    let recovered = store
        .update(|manifest| {
            let mut recovered = 0;
            for entry in manifest
                .media_items
                .iter_mut()
                .filter(|entry| entry.status == MediaStatus::Uploading)
            {
                entry.requeue();
                recovered += 1;
            }
            recovered
        })
        .await?;
    if recovered > 0 {
        warn!(count = recovered, "Interrupted uploads returned to the queue");
    }
    Ok(recovered)
}

/// Handle to an open media queue. Cheap to clone; clones share one worker.
#[derive(Clone)]
pub struct MediaQueueManager {
    config: QueueConfig,
    store: ManifestStore,
    jobs: mpsc::UnboundedSender<Job>,
    callback: Arc<dyn MediaQueueCallback>,
}

impl std::fmt::Debug for MediaQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaQueueManager")
            .field("dir", &self.store.layout().dir())
            .field("config", &self.config)
            .finish()
    }
}

impl MediaQueueManager {
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Directory holding the manifest and every queued file.
    pub fn queue_directory(&self) -> &Path {
        self.store.layout().dir()
    }

    /// Queue a captured file for upload.
    ///
    /// Returns `false` if the source is missing, the copy fails, the request
    /// id is already queued, or the manifest append fails. Nothing is left
    /// behind in any of those cases.
    pub async fn enqueue(
        &self,
        source: impl AsRef<Path>,
        request_id: &str,
        app_id: &str,
        media_type: MediaType,
    ) -> bool {
        match self
            .try_enqueue(source, request_id, app_id, media_type)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(request_id, error = %e, "Error queueing media");
                false
            }
        }
    }

    /// [`enqueue`](Self::enqueue) on behalf of the `"system"` app.
    pub async fn enqueue_system(
        &self,
        source: impl AsRef<Path>,
        request_id: &str,
        media_type: MediaType,
    ) -> bool {
        self.enqueue(source, request_id, DEFAULT_APP_ID, media_type)
            .await
    }

    /// Queue a captured file, reporting why it could not be queued.
    pub async fn try_enqueue(
        &self,
        source: impl AsRef<Path>,
        request_id: &str,
        app_id: &str,
        media_type: MediaType,
    ) -> Result<MediaEntry> {
        let source = source.as_ref();
        let is_file = tokio::fs::metadata(source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(QueueError::SourceMissing(source.to_path_buf()));
        }
        if self.store.read().await.contains(request_id) {
            return Err(QueueError::DuplicateRequest(request_id.to_string()));
        }

        let now = now_millis();
        let queued_path = self.store.layout().queued_file(now, request_id, media_type);
        let bytes = copy_synced(source, &queued_path).await?;
        debug!(request_id, bytes, path = %queued_path.display(), "Media copied into queue");

        let entry = MediaEntry::queued(
            request_id,
            app_id,
            source.to_string_lossy(),
            queued_path.clone(),
            media_type,
            now,
        );

        let appended = self
            .request(|reply| Job::Append {
                entry: entry.clone(),
                reply,
            })
            .await;
        if let Err(e) = appended {
            if let Err(remove_err) = tokio::fs::remove_file(&queued_path).await {
                warn!(path = %queued_path.display(), error = %remove_err, "Failed to remove copied media");
            }
            return Err(e);
        }

        info!(request_id, media_type = %media_type, "Media queued successfully");
        self.callback
            .on_media_queued(request_id, &queued_path, media_type);

        if self.config.process_on_enqueue {
            self.process_queue();
        }
        Ok(entry)
    }

    /// Ask the worker to dispatch every QUEUED entry. Returns immediately.
    pub fn process_queue(&self) {
        if self.jobs.send(Job::ProcessQueue).is_err() {
            error!("Queue worker has stopped, cannot process queue");
        }
    }

    /// Reset FAILED entries with `retryCount <= max_retries` to QUEUED and
    /// process them. Returns how many were reset (0 on error).
    pub async fn retry_failed_uploads(&self, max_retries: u32) -> usize {
        self.try_retry_failed_uploads(max_retries, None)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Error retrying failed uploads");
                0
            })
    }

    /// Retry pass with an optional per-entry backoff since the last failure.
    pub async fn try_retry_failed_uploads(
        &self,
        max_retries: u32,
        backoff: Option<BackoffPolicy>,
    ) -> Result<usize> {
        self.request(|reply| Job::RetryFailed {
            max_retries,
            backoff,
            reply,
        })
        .await
    }

    /// Counts per status. Lock-free; may be slightly stale.
    pub async fn queue_stats(&self) -> QueueStats {
        self.store.read().await.stats()
    }

    /// Every entry currently in the manifest, in enqueue order.
    pub async fn queued_media(&self) -> Vec<MediaEntry> {
        self.store.read().await.media_items
    }

    pub async fn is_queue_empty(&self) -> bool {
        self.store.read().await.media_items.is_empty()
    }

    /// Delete every queued file and every entry. Returns how many were removed.
    pub async fn clear_queue(&self) -> usize {
        self.request(|reply| Job::Clear { reply })
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Error clearing queue");
                0
            })
    }

    /// Rebuild the manifest from the files in the queue directory.
    pub async fn rebuild_manifest(&self) -> bool {
        match self.try_rebuild_manifest().await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to rebuild manifest");
                false
            }
        }
    }

    /// Rebuild the manifest, returning how many entries were recovered.
    pub async fn try_rebuild_manifest(&self) -> Result<usize> {
        self.request(|reply| Job::Rebuild { reply }).await
    }

    /// Remove COMPLETED entries. Returns how many were removed.
    pub async fn compact(&self) -> Result<usize> {
        self.request(|reply| Job::Compact { reply }).await
    }

    /// Wait until every job submitted before this call has been applied.
    ///
    /// Uploads still in flight are not waited for; their results arrive as
    /// later jobs.
    pub async fn sync(&self) -> Result<()> {
        self.request(|reply| Job::Sync { reply }).await
    }

    /// Start the periodic retry pass described by `config().retry`.
    pub fn spawn_retry_scheduler(&self) -> RetryScheduler {
        RetryScheduler::spawn(self.clone(), self.config.retry.clone())
    }

    async fn request<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(job(reply))
            .map_err(|_| QueueError::WorkerStopped)?;
        response.await.map_err(|_| QueueError::WorkerStopped)?
    }
}
