//! Manifest persistence: whole-file JSON, atomic replace, advisory locking.
//!
//! Every write serializes the full manifest into `queue_manifest.json.tmp`,
//! fsyncs it and renames it over `queue_manifest.json`, so readers (and a
//! relaunch after a crash) only ever see a complete manifest. Read-modify-write
//! cycles hold an exclusive advisory lock on `queue_manifest.json.lock`; the
//! manifest file itself cannot carry the lock because every rename replaces
//! its inode.

use std::fs::TryLockError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::layout::QueueLayout;
use crate::media::{now_millis, Manifest};

/// Reads and writes the manifest of one queue directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    layout: QueueLayout,
    lock_timeout: Duration,
    poll_interval: Duration,
}

/// Exclusive hold on the manifest lock file. Released on drop.
#[derive(Debug)]
pub struct ManifestLock {
    file: std::fs::File,
    path: PathBuf,
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %e, "Failed to release manifest lock");
        }
    }
}

impl ManifestStore {
    pub fn new(layout: QueueLayout, lock_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            layout,
            lock_timeout,
            poll_interval,
        }
    }

    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    pub fn path(&self) -> PathBuf {
        self.layout.manifest()
    }

    /// Prepare the queue directory and make sure a valid manifest exists.
    ///
    /// A leftover temp file from an interrupted write is discarded. A missing
    /// manifest is created empty; one that fails validation is replaced with
    /// an empty manifest, losing whatever it described. Runs under the
    /// manifest lock, since the temp file may belong to a live writer.
    pub async fn initialize(&self) -> Result<Manifest> {
        let dir = self.layout.dir();
        fs::create_dir_all(dir)
            .await
            .map_err(|e| QueueError::io(dir, e))?;
        let _lock = self.lock().await?;

        let temp = self.layout.manifest_temp();
        if fs::try_exists(&temp).await.unwrap_or(false) {
            warn!(path = %temp.display(), "Discarding manifest temp file from an interrupted write");
            if let Err(e) = fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %e, "Failed to remove stale manifest temp file");
            }
        }

        match self.read_strict().await {
            Ok(manifest) => {
                debug!(entries = manifest.media_items.len(), "Manifest validated");
                Ok(manifest)
            }
            Err(QueueError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %self.path().display(), "Creating empty manifest");
                self.reset().await
            }
            Err(e) => {
                warn!(error = %e, "Manifest failed validation, replacing with an empty manifest");
                self.reset().await
            }
        }
    }

    /// Read the manifest, treating a missing or corrupt file as empty.
    ///
    /// This is the lock-free read path; results may be stale by the time the
    /// caller looks at them.
    pub async fn read(&self) -> Manifest {
        match self.read_strict().await {
            Ok(manifest) => manifest,
            Err(QueueError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Manifest::empty(now_millis())
            }
            Err(e) => {
                warn!(error = %e, "Unreadable manifest treated as empty");
                Manifest::empty(now_millis())
            }
        }
    }

    /// Read and validate the manifest, surfacing every problem as an error.
    pub async fn read_strict(&self) -> Result<Manifest> {
        let path = self.path();
        let bytes = fs::read(&path).await.map_err(|e| QueueError::io(&path, e))?;
        parse_manifest(&bytes)
    }

    /// Replace the manifest with an empty one.
    pub async fn reset(&self) -> Result<Manifest> {
        let mut manifest = Manifest::empty(now_millis());
        self.write(&mut manifest).await?;
        Ok(manifest)
    }

    /// Stamp `lastUpdated` and atomically replace the manifest on disk.
    pub async fn write(&self, manifest: &mut Manifest) -> Result<()> {
        manifest.last_updated = now_millis();
        let bytes = serde_json::to_vec_pretty(manifest)?;

        let dir = self.layout.dir();
        fs::create_dir_all(dir)
            .await
            .map_err(|e| QueueError::io(dir, e))?;

        let temp = self.layout.manifest_temp();
        if let Err(e) = write_synced(&temp, &bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        let path = self.path();
        fs::rename(&temp, &path)
            .await
            .map_err(|e| QueueError::io(&path, e))?;

        debug!(
            entries = manifest.media_items.len(),
            bytes = bytes.len(),
            "Manifest written"
        );
        Ok(())
    }

    /// Run a read-modify-write cycle under the manifest lock.
    ///
    /// The manifest is only rewritten when `f` actually changed it. An
    /// unreadable manifest is handed to `f` as an empty one.
    pub async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Manifest) -> T,
    {
        let _lock = self.lock().await?;

        let mut manifest = self.read().await;
        let before = manifest.clone();
        let output = f(&mut manifest);

        if manifest != before {
            self.write(&mut manifest).await?;
        }
        Ok(output)
    }

    /// Acquire the exclusive manifest lock, polling until the timeout.
    pub async fn lock(&self) -> Result<ManifestLock> {
        let path = self.layout.manifest_lock();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| QueueError::io(&path, e))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(ManifestLock { file, path }),
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Error(e)) => return Err(QueueError::io(&path, e)),
            }

            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Timed out waiting for manifest lock"
                );
                return Err(QueueError::LockTimeout(self.lock_timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Validate the manifest's top-level structure, then decode it.
fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    let object = value
        .as_object()
        .ok_or_else(|| QueueError::InvalidManifest("manifest is not a JSON object".into()))?;

    match object.get("mediaItems") {
        Some(items) if items.is_array() => {}
        Some(_) => {
            return Err(QueueError::InvalidManifest(
                "'mediaItems' field is not an array".into(),
            ))
        }
        None => {
            return Err(QueueError::InvalidManifest(
                "missing 'mediaItems' field".into(),
            ))
        }
    }

    match object.get("lastUpdated") {
        Some(ts) if ts.is_u64() => {}
        Some(_) => {
            return Err(QueueError::InvalidManifest(
                "'lastUpdated' field is not a valid timestamp".into(),
            ))
        }
        None => {
            return Err(QueueError::InvalidManifest(
                "missing 'lastUpdated' field".into(),
            ))
        }
    }

    serde_json::from_value(value).map_err(|e| QueueError::InvalidManifest(e.to_string()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| QueueError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| QueueError::io(path, e))?;
    file.sync_all().await.map_err(|e| QueueError::io(path, e))
}
