//! Mediaq Core - Durable local staging queue for captured media
//!
//! Photos and videos captured on a device are copied into a private queue
//! directory, recorded in a JSON manifest, and uploaded in the background.
//! The manifest survives crashes and restarts, so nothing captured is lost
//! while the network is down.
//!
//! # Features
//!
//! - Atomic whole-file manifest writes (temp file, fsync, rename)
//! - Advisory lock around every read-modify-write, shared across processes
//! - Single serialized worker per queue; uploads never block capture
//! - Pluggable uploaders (`http` feature for multipart POST, mock for tests)
//! - Periodic retry of failed uploads with optional exponential backoff
//! - Manifest rebuild from the files on disk
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediaq_core::{LoggingCallback, MediaType, MockUploader, QueueBuilder, QueueConfig};
//!
//! # async fn example() -> mediaq_core::Result<()> {
//! let queue = QueueBuilder::new(QueueConfig::from_env())
//!     .uploader(Arc::new(MockUploader::new()))
//!     .callback(Arc::new(LoggingCallback))
//!     .open()
//!     .await?;
//!
//! queue.enqueue("/sdcard/DCIM/IMG_0001.jpg", "req-1", "camera", MediaType::Photo).await;
//! let _scheduler = queue.spawn_retry_scheduler();
//!
//! let stats = queue.queue_stats().await;
//! println!("{} queued, {} failed", stats.queued_count, stats.failed_count);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod media;
pub mod queue;
pub mod uploader;

// Re-export main types for convenience
pub use callback::{LoggingCallback, MediaQueueCallback, NoopCallback};
pub use config::{BackoffPolicy, QueueConfig, RetryPolicy};
pub use error::{QueueError, Result};
pub use layout::{parse_queued_file_name, queued_file_name, ParsedFileName, QueueLayout};
pub use manifest::ManifestStore;
pub use media::{now_millis, Manifest, MediaEntry, MediaStatus, MediaType, QueueStats, DEFAULT_APP_ID};
pub use queue::{MediaQueueManager, QueueBuilder, RetryScheduler};
pub use uploader::{MockOutcome, MockUploader, UploadRequest, Uploader, UploaderConfig, UploaderFactory};

#[cfg(feature = "http")]
pub use uploader::{HttpUploader, HttpUploaderConfig};
