//! Queue configuration
//!
//! Loaded from environment variables with sensible defaults, or built
//! directly by the owning service.

use std::path::PathBuf;
use std::time::Duration;

use crate::layout::QueueLayout;

/// Default time allowed for acquiring the manifest lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default poll interval while waiting for the manifest lock.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default period of the retry scheduler.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Default maximum retry count for failed uploads.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue manager configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory under which `media_queue/` lives (default: current directory)
    pub root_dir: PathBuf,
    /// Time allowed for acquiring the manifest lock (default: 5s)
    pub lock_timeout: Duration,
    /// Poll interval while waiting for the lock (default: 50ms)
    pub lock_poll_interval: Duration,
    /// Start processing as soon as an entry is queued (default: true)
    pub process_on_enqueue: bool,
    /// Retry scheduler settings
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            process_on_enqueue: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Configuration with defaults, rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// - `MEDIAQ_ROOT`: queue root directory
    /// - `MEDIAQ_LOCK_TIMEOUT_MS`: manifest lock timeout
    /// - `MEDIAQ_PROCESS_ON_ENQUEUE`: set to `false` to stage without uploading
    /// - `MEDIAQ_RETRY_INTERVAL_SECS`, `MEDIAQ_MAX_RETRIES`: retry scheduler
    /// - `MEDIAQ_RETRY_BACKOFF_MS`, `MEDIAQ_RETRY_BACKOFF_MAX_MS`: enable backoff
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let root_dir = std::env::var("MEDIAQ_ROOT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.root_dir);

        let lock_timeout = std::env::var("MEDIAQ_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let process_on_enqueue = std::env::var("MEDIAQ_PROCESS_ON_ENQUEUE")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let interval = std::env::var("MEDIAQ_RETRY_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_INTERVAL);

        let max_retries = std::env::var("MEDIAQ_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let backoff = std::env::var("MEDIAQ_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(|initial_ms: u64| {
                let max_ms = std::env::var("MEDIAQ_RETRY_BACKOFF_MAX_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(initial_ms.saturating_mul(32));
                BackoffPolicy {
                    initial_delay: Duration::from_millis(initial_ms),
                    max_delay: Duration::from_millis(max_ms),
                }
            });

        Self {
            root_dir,
            lock_timeout,
            lock_poll_interval: defaults.lock_poll_interval,
            process_on_enqueue,
            retry: RetryPolicy {
                interval,
                max_retries,
                backoff,
            },
        }
    }

    /// Paths of the queue directory and its files.
    pub fn layout(&self) -> QueueLayout {
        QueueLayout::under(&self.root_dir)
    }
}

/// How the manager re-attempts failed uploads on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Period between retry passes (default: 60s)
    pub interval: Duration,
    /// Entries with `retryCount` above this are left FAILED (default: 3)
    pub max_retries: u32,
    /// Optional per-entry delay since the last failure
    pub backoff: Option<BackoffPolicy>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: None,
        }
    }
}

/// Exponential delay applied per entry: `initial * 2^(retryCount - 1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Delay an entry must wait after its `retry_count`-th failure.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}
