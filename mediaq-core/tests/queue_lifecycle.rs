//! Lifecycle tests for the media queue.
//!
//! These drive a real queue directory through enqueue, upload, failure,
//! retry, restart and rebuild, and check what ends up on disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediaq_core::{
    Manifest, ManifestStore, MediaEntry, MediaQueueCallback, MediaQueueManager, MediaStatus,
    MediaType, MockOutcome, MockUploader, QueueBuilder, QueueConfig, QueueError, UploadRequest,
    Uploader,
};
use tempfile::TempDir;

/// Maximum time to wait for background uploads to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Config that stages on enqueue; tests decide when to process.
fn manual_config(root: &Path) -> QueueConfig {
    QueueConfig {
        process_on_enqueue: false,
        ..QueueConfig::new(root)
    }
}

/// Write a fake capture outside the queue directory.
fn capture(temp: &TempDir, name: &str) -> PathBuf {
    let path = temp.path().join(name);
    std::fs::write(&path, format!("bytes of {name}")).unwrap();
    path
}

fn manifest_on_disk(queue: &MediaQueueManager) -> Manifest {
    let bytes = std::fs::read(queue.queue_directory().join("queue_manifest.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn entry<'a>(manifest: &'a Manifest, request_id: &str) -> &'a MediaEntry {
    manifest
        .find(request_id)
        .unwrap_or_else(|| panic!("no entry for {request_id}"))
}

/// Poll until `check` holds or the settle timeout expires.
async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Uploader answering every request with one fixed URL.
struct FixedUrlUploader(&'static str);

#[async_trait]
impl Uploader for FixedUrlUploader {
    async fn upload(&self, _request: &UploadRequest) -> mediaq_core::Result<String> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Snapshots the manifest at the moment each upload is reported.
struct Snapshotter {
    manifest: PathBuf,
    seen: Mutex<Vec<Manifest>>,
}

impl MediaQueueCallback for Snapshotter {
    fn on_media_uploaded(&self, _request_id: &str, _url: &str, _media_type: MediaType) {
        let bytes = std::fs::read(&self.manifest).unwrap();
        self.seen
            .lock()
            .unwrap()
            .push(serde_json::from_slice(&bytes).unwrap());
    }
}

// ============================================================================
// Concrete scenario
// ============================================================================

#[tokio::test]
async fn test_photo_travels_from_queued_to_compacted() {
    let temp = TempDir::new().unwrap();
    let config = manual_config(temp.path());
    let snapshots = Arc::new(Snapshotter {
        manifest: config.layout().manifest(),
        seen: Mutex::new(Vec::new()),
    });
    let uploader = Arc::new(MockUploader::new().gated());

    // A gated mock keeps the entry observable in UPLOADING.
    let staging = QueueBuilder::new(config.clone())
        .uploader(uploader.clone())
        .callback(snapshots.clone())
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    assert!(staging.enqueue(&source, "r1", "camera", MediaType::Photo).await);

    let queued = manifest_on_disk(&staging);
    let r1 = entry(&queued, "r1");
    assert_eq!(r1.status, MediaStatus::Queued);
    assert_eq!(r1.media_type, MediaType::Photo);
    assert_eq!(r1.retry_count, 0);
    let queued_path = r1.queued_path.clone();
    assert!(queued_path.exists());

    staging.process_queue();
    staging.sync().await.unwrap();
    let uploading = manifest_on_disk(&staging);
    let r1 = entry(&uploading, "r1");
    assert_eq!(r1.status, MediaStatus::Uploading);
    assert!(r1.upload_start_time.is_some());

    // Reopen with an uploader that reports the expected URL.
    drop(staging);
    let queue = QueueBuilder::new(config)
        .recover_interrupted(true)
        .uploader(Arc::new(FixedUrlUploader("https://x/1.jpg")))
        .callback(snapshots.clone())
        .open()
        .await
        .unwrap();
    queue.process_queue();

    assert!(wait_until(|| async { queue.is_queue_empty().await }).await);
    queue.sync().await.unwrap();

    let seen = snapshots.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let completed = entry(&seen[0], "r1");
    assert_eq!(completed.status, MediaStatus::Completed);
    assert_eq!(completed.media_url.as_deref(), Some("https://x/1.jpg"));
    assert!(completed.completed_time.is_some());

    assert!(!queued_path.exists(), "completed file must be deleted");
    assert!(source.exists(), "original capture is never touched");
}

// ============================================================================
// At-least-once delivery
// ============================================================================

#[tokio::test]
async fn test_completed_entries_match_uploader_successes() {
    let temp = TempDir::new().unwrap();
    let uploader = Arc::new(MockUploader::new().with_script([
        MockOutcome::Succeed,
        MockOutcome::Fail("Server error: 503".into()),
        MockOutcome::Succeed,
    ]));
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(uploader.clone())
        .open()
        .await
        .unwrap();

    for i in 0..3 {
        let source = capture(&temp, &format!("IMG_{i}.jpg"));
        assert!(queue.enqueue_system(&source, &format!("r{i}"), MediaType::Photo).await);
    }
    queue.process_queue();

    assert!(
        wait_until(|| async {
            let stats = queue.queue_stats().await;
            stats.total_count == 1 && stats.failed_count == 1
        })
        .await
    );
    queue.sync().await.unwrap();

    let remaining = queue.queued_media().await;
    assert_eq!(remaining.len(), 1);
    let failed = &remaining[0];
    assert_eq!(failed.status, MediaStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.last_error.as_deref(), Some("Server error: 503"));
    assert!(failed.failed_time.is_some());
    assert!(failed.queued_path.exists(), "failed file is kept for retry");

    let mut called: Vec<String> = uploader.calls().into_iter().map(|c| c.request_id).collect();
    called.sort();
    assert_eq!(called, vec!["r0", "r1", "r2"]);

    // Exactly the queued files of completed entries are gone.
    let files: Vec<String> = std::fs::read_dir(queue.queue_directory())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("media_"))
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with(&format!("_{}.jpg", failed.request_id)));
}

#[tokio::test]
async fn test_missing_queued_file_fails_the_entry() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(Arc::new(MockUploader::new()))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "clip.mp4");
    let queued = queue
        .try_enqueue(&source, "v1", "system", MediaType::Video)
        .await
        .unwrap();
    std::fs::remove_file(&queued.queued_path).unwrap();

    queue.process_queue();
    assert!(wait_until(|| async { queue.queue_stats().await.failed_count == 1 }).await);

    let media = queue.queued_media().await;
    assert!(media[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("does not exist")));
}

#[tokio::test]
async fn test_repeated_process_calls_dispatch_each_entry_once() {
    let temp = TempDir::new().unwrap();
    let uploader = Arc::new(MockUploader::new().gated());
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(uploader.clone())
        .open()
        .await
        .unwrap();

    let count = 4;
    for i in 0..count {
        let source = capture(&temp, &format!("IMG_{i}.jpg"));
        assert!(queue.enqueue_system(&source, &format!("r{i}"), MediaType::Photo).await);
    }
    for _ in 0..5 {
        queue.process_queue();
    }
    queue.sync().await.unwrap();
    assert_eq!(queue.queue_stats().await.uploading_count, count);

    uploader.release(count);
    assert!(wait_until(|| async { queue.is_queue_empty().await }).await);
    queue.process_queue();
    queue.sync().await.unwrap();

    assert_eq!(uploader.call_count(), count);
    let mut called: Vec<String> = uploader.calls().into_iter().map(|c| c.request_id).collect();
    called.sort();
    called.dedup();
    assert_eq!(called, vec!["r0", "r1", "r2", "r3"]);
}

// ============================================================================
// Concurrent handles
// ============================================================================

#[tokio::test]
async fn test_inspection_during_upload_keeps_the_result() {
    let temp = TempDir::new().unwrap();
    let config = manual_config(temp.path());
    let uploader = Arc::new(MockUploader::new().gated());
    let queue = QueueBuilder::new(config.clone())
        .uploader(uploader.clone())
        .recover_interrupted(true)
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    let queued = queue
        .try_enqueue(&source, "r1", "system", MediaType::Photo)
        .await
        .unwrap();
    queue.process_queue();
    queue.sync().await.unwrap();

    // Read-only view, then a full second handle, both while r1 is in flight.
    let store = ManifestStore::new(
        config.layout(),
        config.lock_timeout,
        config.lock_poll_interval,
    );
    assert_eq!(store.read().await.stats().uploading_count, 1);
    let inspector = QueueBuilder::new(config).open().await.unwrap();
    assert_eq!(inspector.queue_stats().await.uploading_count, 1);
    assert_eq!(entry(&manifest_on_disk(&queue), "r1").status, MediaStatus::Uploading);

    uploader.release(1);
    assert!(wait_until(|| async { queue.is_queue_empty().await }).await);
    queue.sync().await.unwrap();

    assert!(!queued.queued_path.exists());
    assert!(inspector.is_queue_empty().await);
    assert_eq!(uploader.call_count(), 1);
}

// ============================================================================
// Compaction
// ============================================================================

#[tokio::test]
async fn test_compaction_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    assert!(queue.enqueue_system(&source, "keep", MediaType::Photo).await);

    // Another process recorded a completion but crashed before compacting.
    let store = ManifestStore::new(
        queue.config().layout(),
        queue.config().lock_timeout,
        queue.config().lock_poll_interval,
    );
    let leftover = queue.queue_directory().join("media_5_done.jpg");
    std::fs::write(&leftover, b"uploaded").unwrap();
    store
        .update(|manifest| {
            let mut done = MediaEntry::queued("done", "system", "", leftover.clone(), MediaType::Photo, 5);
            done.mark_uploading(6);
            done.mark_completed("https://x/done.jpg", 7);
            manifest.media_items.push(done);
        })
        .await
        .unwrap();

    assert_eq!(queue.compact().await.unwrap(), 1);
    let once = manifest_on_disk(&queue);
    assert!(!leftover.exists());

    assert_eq!(queue.compact().await.unwrap(), 0);
    let twice = manifest_on_disk(&queue);

    assert_eq!(once.media_items, twice.media_items);
    assert_eq!(once.last_updated, twice.last_updated, "no-op compaction must not rewrite");
    assert_eq!(twice.media_items.len(), 1);
    assert_eq!(twice.media_items[0].request_id, "keep");
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_no_entries_lost_across_restart() {
    let temp = TempDir::new().unwrap();
    let uploader = Arc::new(MockUploader::new().gated());
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(uploader.clone())
        .open()
        .await
        .unwrap();

    let ids = ["a", "b", "c"];
    for id in ids {
        let source = capture(&temp, &format!("{id}.jpg"));
        assert!(queue.enqueue_system(&source, id, MediaType::Photo).await);
    }
    queue.process_queue();
    queue.sync().await.unwrap();
    assert_eq!(queue.queue_stats().await.uploading_count, 3);

    // Simulated crash: the uploads never report back.
    drop(queue);

    let reopened = QueueBuilder::new(manual_config(temp.path()))
        .recover_interrupted(true)
        .open()
        .await
        .unwrap();
    let media = reopened.queued_media().await;
    assert_eq!(media.len(), 3);
    for (entry, id) in media.iter().zip(ids) {
        assert_eq!(entry.request_id, id);
        assert_eq!(entry.status, MediaStatus::Queued);
        assert!(entry.queued_path.exists());
    }
}

// ============================================================================
// Retry bound
// ============================================================================

#[tokio::test]
async fn test_retry_bound_is_respected() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(Arc::new(MockUploader::failing("Network error during upload")))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    assert!(queue.enqueue_system(&source, "r1", MediaType::Photo).await);

    queue.process_queue();
    let mut expected_retries = 1;
    assert!(wait_until(|| async { queue.queue_stats().await.failed_count == 1 }).await);

    // Each pass with max 2 resets the entry while retryCount <= 2.
    loop {
        let reset = queue.retry_failed_uploads(2).await;
        if expected_retries > 2 {
            assert_eq!(reset, 0, "retryCount {expected_retries} must not be reset");
            break;
        }
        assert_eq!(reset, 1);
        expected_retries += 1;
        let want = expected_retries;
        assert!(
            wait_until(|| async {
                queue
                    .queued_media()
                    .await
                    .first()
                    .is_some_and(|e| e.status == MediaStatus::Failed && e.retry_count == want)
            })
            .await
        );
    }

    let media = queue.queued_media().await;
    assert_eq!(media[0].retry_count, 3);
    assert_eq!(media[0].status, MediaStatus::Failed);
    assert!(media[0].queued_path.exists());
}

#[tokio::test]
async fn test_retry_backoff_holds_recent_failures() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .uploader(Arc::new(MockUploader::failing("offline")))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    assert!(queue.enqueue_system(&source, "r1", MediaType::Photo).await);
    queue.process_queue();
    assert!(wait_until(|| async { queue.queue_stats().await.failed_count == 1 }).await);

    let long = mediaq_core::BackoffPolicy {
        initial_delay: Duration::from_secs(3600),
        max_delay: Duration::from_secs(3600),
    };
    assert_eq!(queue.try_retry_failed_uploads(3, Some(long)).await.unwrap(), 0);

    let none = mediaq_core::BackoffPolicy {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    assert_eq!(queue.try_retry_failed_uploads(3, Some(none)).await.unwrap(), 1);
}

// ============================================================================
// Manifest durability
// ============================================================================

#[tokio::test]
async fn test_truncated_temp_manifest_is_ignored_on_open() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    assert!(queue.enqueue_system(&source, "r1", MediaType::Photo).await);
    let before = manifest_on_disk(&queue);
    let dir = queue.queue_directory().to_path_buf();
    drop(queue);

    // A writer died halfway through its temp file.
    std::fs::write(dir.join("queue_manifest.json.tmp"), b"{\"mediaItems\": [{\"req").unwrap();

    let reopened = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    assert_eq!(reopened.queued_media().await, before.media_items);
    assert!(!dir.join("queue_manifest.json.tmp").exists());
}

#[tokio::test]
async fn test_corrupt_manifest_is_replaced_on_open() {
    let temp = TempDir::new().unwrap();
    let dir = QueueConfig::new(temp.path()).layout().dir().to_path_buf();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("queue_manifest.json"), b"{\"mediaItems\": 7}").unwrap();

    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    assert!(queue.is_queue_empty().await);
    assert!(manifest_on_disk(&queue).media_items.is_empty());
}

// ============================================================================
// Rebuild
// ============================================================================

#[tokio::test]
async fn test_rebuild_recovers_orphans() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    let dir = queue.queue_directory().to_path_buf();

    std::fs::write(dir.join("media_2000_clip.MP4"), b"video").unwrap();
    std::fs::write(dir.join("media_1000_shot.jpg"), b"photo").unwrap();
    std::fs::write(dir.join("media_nots.jpg"), b"photo").unwrap();
    std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

    assert_eq!(queue.try_rebuild_manifest().await.unwrap(), 3);

    let media = queue.queued_media().await;
    let ids: Vec<&str> = media.iter().map(|e| e.request_id.as_str()).collect();
    assert_eq!(ids, vec!["shot", "clip", "unknown"]);

    assert_eq!(media[0].media_type, MediaType::Photo);
    assert_eq!(media[0].queued_time, Some(1000));
    assert_eq!(media[1].media_type, MediaType::Video);
    assert_eq!(media[1].queued_time, Some(2000));
    assert!(media.iter().all(|e| e.status == MediaStatus::Queued));
    assert!(media.iter().all(|e| e.app_id == "system" && e.retry_count == 0));
    assert!(queue.rebuild_manifest().await);
}

#[tokio::test]
async fn test_rebuild_replaces_existing_entries() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();
    let source = capture(&temp, "IMG_1.jpg");
    let queued = queue
        .try_enqueue(&source, "r1", "camera", MediaType::Photo)
        .await
        .unwrap();
    std::fs::remove_file(&queued.queued_path).unwrap();

    assert_eq!(queue.try_rebuild_manifest().await.unwrap(), 0);
    assert!(queue.is_queue_empty().await);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_enqueue_missing_source_reports_it() {
    let temp = TempDir::new().unwrap();
    let queue = QueueBuilder::new(manual_config(temp.path()))
        .open()
        .await
        .unwrap();

    let err = queue
        .try_enqueue(temp.path().join("missing.jpg"), "r1", "system", MediaType::Photo)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::SourceMissing(_)));
    assert!(queue.is_queue_empty().await);
}
