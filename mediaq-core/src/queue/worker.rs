//! The serialized worker that owns every manifest mutation.
//!
//! Jobs arrive over an unbounded channel and are applied one at a time, so
//! the QUEUED -> UPLOADING flip is the single mutual-exclusion point for
//! dispatch. Uploads run on their own tasks and report back as jobs; the
//! worker never waits on the network.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::callback::MediaQueueCallback;
use crate::config::BackoffPolicy;
use crate::error::{QueueError, Result};
use crate::layout::parse_queued_file_name;
use crate::manifest::ManifestStore;
use crate::media::{now_millis, Manifest, MediaEntry, MediaStatus, MediaType, DEFAULT_APP_ID};
use crate::uploader::{UploadRequest, Uploader};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Job {
    Append {
        entry: MediaEntry,
        reply: Reply<()>,
    },
    ProcessQueue,
    UploadFinished {
        request_id: String,
        media_type: MediaType,
        outcome: std::result::Result<String, String>,
    },
    Compact {
        reply: Reply<usize>,
    },
    RetryFailed {
        max_retries: u32,
        backoff: Option<BackoffPolicy>,
        reply: Reply<usize>,
    },
    Clear {
        reply: Reply<usize>,
    },
    Rebuild {
        reply: Reply<usize>,
    },
    Sync {
        reply: Reply<()>,
    },
}

pub(crate) struct Worker {
    store: ManifestStore,
    uploader: Option<Arc<dyn Uploader>>,
    callback: Arc<dyn MediaQueueCallback>,
    /// Weak so the worker alone never keeps its channel open.
    jobs: WeakUnboundedSender<Job>,
}

impl Worker {
    pub(crate) fn new(
        store: ManifestStore,
        uploader: Option<Arc<dyn Uploader>>,
        callback: Arc<dyn MediaQueueCallback>,
        jobs: &UnboundedSender<Job>,
    ) -> Self {
        Self {
            store,
            uploader,
            callback,
            jobs: jobs.downgrade(),
        }
    }

    /// Run until every sender (manager clones and in-flight uploads) is gone.
    pub(crate) async fn run(self, mut rx: UnboundedReceiver<Job>) {
        debug!(dir = %self.store.layout().dir().display(), "Queue worker started");
        while let Some(job) = rx.recv().await {
            self.handle(job).await;
        }
        debug!("Queue worker stopped");
    }

    async fn handle(&self, job: Job) {
        match job {
            Job::Append { entry, reply } => {
                let _ = reply.send(self.append(entry).await);
            }
            Job::ProcessQueue => self.process_queue().await,
            Job::UploadFinished {
                request_id,
                media_type,
                outcome,
            } => match outcome {
                Ok(url) => self.upload_succeeded(&request_id, &url, media_type).await,
                Err(message) => self.upload_failed(&request_id, &message, media_type).await,
            },
            Job::Compact { reply } => {
                let _ = reply.send(self.compact().await);
            }
            Job::RetryFailed {
                max_retries,
                backoff,
                reply,
            } => {
                let _ = reply.send(self.retry_failed(max_retries, backoff).await);
            }
            Job::Clear { reply } => {
                let _ = reply.send(self.clear().await);
            }
            Job::Rebuild { reply } => {
                let _ = reply.send(self.rebuild().await);
            }
            Job::Sync { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn append(&self, entry: MediaEntry) -> Result<()> {
        let request_id = entry.request_id.clone();
        self.store
            .update(move |manifest| {
                if manifest.contains(&entry.request_id) {
                    return Err(QueueError::DuplicateRequest(entry.request_id));
                }
                manifest.media_items.push(entry);
                Ok(())
            })
            .await??;
        debug!(request_id = %request_id, "Entry appended to manifest");
        Ok(())
    }

    /// Flip every QUEUED entry to UPLOADING and dispatch one attempt each.
    async fn process_queue(&self) {
        let Some(uploader) = self.uploader.clone() else {
            debug!("No uploader configured, queued media stays queued");
            return;
        };
        let Some(jobs) = self.jobs.upgrade() else {
            debug!("Queue is shutting down, not dispatching uploads");
            return;
        };

        let now = now_millis();
        let dispatched = self
            .store
            .update(|manifest| {
                manifest
                    .media_items
                    .iter_mut()
                    .filter(|entry| entry.status == MediaStatus::Queued)
                    .map(|entry| {
                        entry.mark_uploading(now);
                        UploadRequest {
                            path: entry.queued_path.clone(),
                            request_id: entry.request_id.clone(),
                            app_id: entry.app_id.clone(),
                            media_type: entry.media_type,
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .await;

        let requests = match dispatched {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "Error processing queue");
                return;
            }
        };

        if requests.is_empty() {
            return;
        }
        info!(count = requests.len(), uploader = uploader.name(), "Started uploading media from queue");

        for request in requests {
            let uploader = Arc::clone(&uploader);
            let jobs = jobs.clone();
            tokio::spawn(async move {
                let outcome = uploader
                    .upload(&request)
                    .await
                    .map_err(|e| e.to_string());
                let finished = Job::UploadFinished {
                    request_id: request.request_id,
                    media_type: request.media_type,
                    outcome,
                };
                if jobs.send(finished).is_err() {
                    warn!("Queue worker gone before upload result could be recorded");
                }
            });
        }
    }

    async fn upload_succeeded(&self, request_id: &str, url: &str, media_type: MediaType) {
        let now = now_millis();
        let updated = self
            .store
            .update(|manifest| match manifest.find_mut(request_id) {
                Some(entry) if entry.status == MediaStatus::Uploading => {
                    entry.mark_completed(url, now);
                    Some(entry.queued_path.clone())
                }
                _ => None,
            })
            .await;

        match updated {
            Ok(Some(queued_path)) => {
                info!(request_id, url, "Media upload successful");
                remove_queued_file(&queued_path).await;
                self.callback.on_media_uploaded(request_id, url, media_type);
                if let Err(e) = self.compact().await {
                    error!(error = %e, "Error cleaning up completed media");
                }
            }
            Ok(None) => {
                debug!(request_id, "Entry no longer uploading, dropping success result");
            }
            Err(e) => error!(request_id, error = %e, "Error handling upload success"),
        }
    }

    async fn upload_failed(&self, request_id: &str, message: &str, media_type: MediaType) {
        let now = now_millis();
        let updated = self
            .store
            .update(|manifest| match manifest.find_mut(request_id) {
                Some(entry) if entry.status == MediaStatus::Uploading => {
                    entry.mark_failed(message, now);
                    Some(entry.retry_count)
                }
                _ => None,
            })
            .await;

        match updated {
            Ok(Some(retry_count)) => {
                warn!(request_id, retry_count, error = message, "Media upload failed");
                self.callback
                    .on_media_upload_failed(request_id, message, media_type);
            }
            Ok(None) => {
                debug!(request_id, "Entry no longer uploading, dropping failure result");
            }
            Err(e) => error!(request_id, error = %e, "Error handling upload failure"),
        }
    }

    /// Remove COMPLETED entries, deleting any queued file a crash left behind.
    async fn compact(&self) -> Result<usize> {
        let removed = self
            .store
            .update(Manifest::remove_completed)
            .await?;

        for entry in &removed {
            remove_queued_file(&entry.queued_path).await;
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "Cleaned up completed media from queue");
        }
        Ok(removed.len())
    }

    async fn retry_failed(&self, max_retries: u32, backoff: Option<BackoffPolicy>) -> Result<usize> {
        let now = now_millis();
        let reset = self
            .store
            .update(|manifest| {
                let mut reset = 0;
                for entry in manifest.media_items.iter_mut() {
                    if entry.status != MediaStatus::Failed || entry.retry_count > max_retries {
                        continue;
                    }
                    if let (Some(policy), Some(failed_at)) = (backoff, entry.failed_time) {
                        let wait = policy.delay_for(entry.retry_count).as_millis() as u64;
                        if now.saturating_sub(failed_at) < wait {
                            continue;
                        }
                    }
                    entry.requeue();
                    reset += 1;
                }
                reset
            })
            .await?;

        if reset > 0 {
            info!(count = reset, max_retries, "Failed uploads queued for retry");
            self.process_queue().await;
        }
        Ok(reset)
    }

    async fn clear(&self) -> Result<usize> {
        let removed = self
            .store
            .update(|manifest| std::mem::take(&mut manifest.media_items))
            .await?;

        for entry in &removed {
            remove_queued_file(&entry.queued_path).await;
        }
        info!(count = removed.len(), "Queue cleared");
        Ok(removed.len())
    }

    /// Replace the manifest with one entry per recognisable queued file.
    async fn rebuild(&self) -> Result<usize> {
        let _lock = self.store.lock().await?;
        let dir = self.store.layout().dir().to_path_buf();

        let mut recovered = Vec::new();
        let mut listing = fs::read_dir(&dir)
            .await
            .map_err(|e| QueueError::io(&dir, e))?;
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|e| QueueError::io(&dir, e))?
        {
            let is_file = item.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let file_name = item.file_name();
            let Some(parsed) = file_name.to_str().and_then(parse_queued_file_name) else {
                continue;
            };

            let queued_time = parsed.timestamp.unwrap_or_else(now_millis);
            recovered.push(MediaEntry::queued(
                parsed.request_id,
                DEFAULT_APP_ID,
                "",
                item.path(),
                parsed.media_type,
                queued_time,
            ));
        }

        recovered.sort_by(|a, b| {
            a.queued_time
                .cmp(&b.queued_time)
                .then_with(|| a.queued_path.cmp(&b.queued_path))
        });

        let count = recovered.len();
        let mut manifest = Manifest::empty(now_millis());
        manifest.media_items = recovered;
        self.store.write(&mut manifest).await?;

        info!(count, "Manifest rebuilt from queue directory");
        Ok(count)
    }
}

async fn remove_queued_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Deleted queued file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete queued file"),
    }
}

/// Copy `source` to a new file at `dest` and flush it to disk.
///
/// Never overwrites: an existing `dest` is an error and is left untouched.
/// A partially written `dest` is removed before the error is returned.
pub(crate) async fn copy_synced(source: &Path, dest: &Path) -> Result<u64> {
    let mut input = fs::File::open(source)
        .await
        .map_err(|e| QueueError::io(source, e))?;
    let mut output = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
        .map_err(|e| QueueError::io(dest, e))?;

    let copied = async {
        let bytes = tokio::io::copy(&mut input, &mut output).await?;
        output.sync_all().await?;
        Ok::<_, std::io::Error>(bytes)
    }
    .await;

    match copied {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(output);
            let _ = fs::remove_file(dest).await;
            Err(QueueError::io(PathBuf::from(dest), e))
        }
    }
}
