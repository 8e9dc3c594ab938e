//! Media entries, their lifecycle states, and the manifest that tracks them.
//!
//! The JSON shape of these types is the on-disk contract of the queue
//! directory: camelCase field names, `mediaType` as an integer (1 = photo,
//! 2 = video) and `status` as a lowercase string.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// App id recorded when the caller does not name one.
pub const DEFAULT_APP_ID: &str = "system";

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Kind of captured media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// Extension used for queued copies (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }

    /// MIME type sent to the upload endpoint.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Photo => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }

    /// Lowercase label used in upload metadata and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    /// Guess the media type of a captured file from its extension.
    ///
    /// Anything that is not a known video container is treated as a photo.
    pub fn detect(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("mp4" | "mov" | "avi" | "mkv" | "webm" | "3gp") => Self::Video,
            _ => Self::Photo,
        }
    }
}

impl From<MediaType> for u8 {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::Photo => 1,
            MediaType::Video => 2,
        }
    }
}

impl TryFrom<u8> for MediaType {
    type Error = QueueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Photo),
            2 => Ok(Self::Video),
            other => Err(QueueError::InvalidManifest(format!(
                "unknown media type: {other}"
            ))),
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "photo" | "image" | "1" => Ok(Self::Photo),
            "video" | "2" => Ok(Self::Video),
            other => Err(QueueError::Config(format!("unknown media type: {other}"))),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Upload lifecycle of a [`MediaEntry`].
///
/// `Queued -> Uploading -> Completed | Failed`, and `Failed -> Queued` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Queued,
    Uploading,
    Completed,
    Failed,
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.pad(label)
    }
}

/// One physical media file awaiting or having completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub request_id: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Path the capture producer handed us. May be gone by now.
    #[serde(default)]
    pub original_path: String,
    /// Manager-owned copy; authoritative for upload and cleanup.
    pub queued_path: PathBuf,
    pub media_type: MediaType,
    pub status: MediaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_time: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

impl MediaEntry {
    /// A freshly queued entry with no upload history.
    pub fn queued(
        request_id: impl Into<String>,
        app_id: impl Into<String>,
        original_path: impl Into<String>,
        queued_path: impl Into<PathBuf>,
        media_type: MediaType,
        queued_time: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            app_id: app_id.into(),
            original_path: original_path.into(),
            queued_path: queued_path.into(),
            media_type,
            status: MediaStatus::Queued,
            queued_time: Some(queued_time),
            upload_start_time: None,
            completed_time: None,
            failed_time: None,
            retry_count: 0,
            last_error: None,
            media_url: None,
        }
    }

    pub fn mark_uploading(&mut self, now: u64) {
        self.status = MediaStatus::Uploading;
        self.upload_start_time = Some(now);
    }

    pub fn mark_completed(&mut self, url: impl Into<String>, now: u64) {
        self.status = MediaStatus::Completed;
        self.media_url = Some(url.into());
        self.completed_time = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: u64) {
        self.status = MediaStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.failed_time = Some(now);
    }

    /// Put the entry back in line for upload. `retry_count` is preserved.
    pub fn requeue(&mut self) {
        self.status = MediaStatus::Queued;
    }
}

/// Counts per status plus the manifest's last write time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_count: usize,
    pub queued_count: usize,
    pub uploading_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub last_updated: u64,
}

/// The singleton durable record listing every known entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub media_items: Vec<MediaEntry>,
    pub last_updated: u64,
}

impl Manifest {
    pub fn empty(now: u64) -> Self {
        Self {
            media_items: Vec::new(),
            last_updated: now,
        }
    }

    pub fn find(&self, request_id: &str) -> Option<&MediaEntry> {
        self.media_items
            .iter()
            .find(|entry| entry.request_id == request_id)
    }

    pub fn find_mut(&mut self, request_id: &str) -> Option<&mut MediaEntry> {
        self.media_items
            .iter_mut()
            .find(|entry| entry.request_id == request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.find(request_id).is_some()
    }

    /// Take every COMPLETED entry out of the manifest, keeping the order of
    /// the rest.
    pub fn remove_completed(&mut self) -> Vec<MediaEntry> {
        let (completed, kept) = std::mem::take(&mut self.media_items)
            .into_iter()
            .partition(|entry| entry.status == MediaStatus::Completed);
        self.media_items = kept;
        completed
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_count: self.media_items.len(),
            last_updated: self.last_updated,
            ..QueueStats::default()
        };
        for entry in &self.media_items {
            match entry.status {
                MediaStatus::Queued => stats.queued_count += 1,
                MediaStatus::Uploading => stats.uploading_count += 1,
                MediaStatus::Completed => stats.completed_count += 1,
                MediaStatus::Failed => stats.failed_count += 1,
            }
        }
        stats
    }
}
