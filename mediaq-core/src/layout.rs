//! Queue directory layout and the queued-file naming convention.
//!
//! Queued copies are named `media_<epochMs>_<requestId>.<jpg|mp4>`. The name
//! is load-bearing: [`parse_queued_file_name`] is how a lost manifest is
//! rebuilt from the directory contents.

use std::path::{Path, PathBuf};

use crate::media::MediaType;

/// Name of the queue directory under the configured root.
pub const QUEUE_DIR_NAME: &str = "media_queue";

/// Canonical manifest file.
pub const MANIFEST_FILE_NAME: &str = "queue_manifest.json";

/// Write-ahead file renamed over the manifest on every write.
pub const MANIFEST_TEMP_FILE_NAME: &str = "queue_manifest.json.tmp";

/// Advisory lock file guarding manifest read-modify-write cycles.
pub const MANIFEST_LOCK_FILE_NAME: &str = "queue_manifest.json.lock";

const FILE_PREFIX: &str = "media_";

/// Request id recorded for files whose name does not carry one.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Paths of everything the queue owns on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    dir: PathBuf,
}

impl QueueLayout {
    /// Layout rooted at `<root>/media_queue`.
    pub fn under(root: &Path) -> Self {
        Self {
            dir: root.join(QUEUE_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE_NAME)
    }

    pub fn manifest_temp(&self) -> PathBuf {
        self.dir.join(MANIFEST_TEMP_FILE_NAME)
    }

    pub fn manifest_lock(&self) -> PathBuf {
        self.dir.join(MANIFEST_LOCK_FILE_NAME)
    }

    /// Destination for a newly queued copy.
    pub fn queued_file(&self, timestamp: u64, request_id: &str, media_type: MediaType) -> PathBuf {
        self.dir
            .join(queued_file_name(timestamp, request_id, media_type))
    }
}

/// Build `media_<timestamp>_<requestId>.<ext>`.
///
/// Path separators in the request id are replaced with `-` so the copy always
/// lands directly inside the queue directory.
pub fn queued_file_name(timestamp: u64, request_id: &str, media_type: MediaType) -> String {
    let safe_id: String = request_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '-' } else { c })
        .collect();
    format!(
        "{FILE_PREFIX}{timestamp}_{safe_id}.{}",
        media_type.extension()
    )
}

/// What can be recovered from a queued file's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileName {
    /// `None` when the timestamp segment is missing or not a number.
    pub timestamp: Option<u64>,
    pub request_id: String,
    pub media_type: MediaType,
}

/// Parse a queued file name back into its parts.
///
/// Returns `None` for files that are not queued media at all (wrong prefix or
/// extension), so manifests, temp files and strangers are skipped.
pub fn parse_queued_file_name(name: &str) -> Option<ParsedFileName> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let (stem, ext) = rest.rsplit_once('.')?;
    let media_type = match ext.to_ascii_lowercase().as_str() {
        "jpg" => MediaType::Photo,
        "mp4" => MediaType::Video,
        _ => return None,
    };

    let (timestamp, request_id) = match stem.split_once('_') {
        Some((ts, id)) if !id.is_empty() => (ts.parse().ok(), id.to_string()),
        _ => (None, UNKNOWN_REQUEST_ID.to_string()),
    };

    Some(ParsedFileName {
        timestamp,
        request_id,
        media_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_file_name_format() {
        assert_eq!(
            queued_file_name(1700000000123, "r1", MediaType::Photo),
            "media_1700000000123_r1.jpg"
        );
        assert_eq!(
            queued_file_name(5, "clip", MediaType::Video),
            "media_5_clip.mp4"
        );
    }

    #[test]
    fn test_request_id_separators_are_neutralised() {
        let name = queued_file_name(1, "../etc/passwd", MediaType::Photo);
        assert_eq!(name, "media_1_..-etc-passwd.jpg");
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_parse_round_trips_request_id_with_underscores() {
        let parsed = parse_queued_file_name("media_1700_req_with_parts.mp4").unwrap();
        assert_eq!(parsed.timestamp, Some(1700));
        assert_eq!(parsed.request_id, "req_with_parts");
        assert_eq!(parsed.media_type, MediaType::Video);
    }

    #[test]
    fn test_parse_accepts_uppercase_extension() {
        let parsed = parse_queued_file_name("media_1_r1.JPG").unwrap();
        assert_eq!(parsed.media_type, MediaType::Photo);
    }

    #[test]
    fn test_parse_degrades_on_malformed_segments() {
        let parsed = parse_queued_file_name("media_notanumber_r2.jpg").unwrap();
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.request_id, "r2");

        let parsed = parse_queued_file_name("media_orphan.mp4").unwrap();
        assert_eq!(parsed.request_id, UNKNOWN_REQUEST_ID);
        assert_eq!(parsed.media_type, MediaType::Video);
    }

    #[test]
    fn test_parse_rejects_non_media_files() {
        assert!(parse_queued_file_name(MANIFEST_FILE_NAME).is_none());
        assert!(parse_queued_file_name(MANIFEST_TEMP_FILE_NAME).is_none());
        assert!(parse_queued_file_name("media_1_r1.png").is_none());
        assert!(parse_queued_file_name("photo_1_r1.jpg").is_none());
    }

    #[test]
    fn test_layout_paths() {
        let layout = QueueLayout::under(Path::new("/data"));
        assert_eq!(layout.dir(), Path::new("/data/media_queue"));
        assert_eq!(
            layout.manifest(),
            PathBuf::from("/data/media_queue/queue_manifest.json")
        );
        assert_eq!(
            layout.queued_file(7, "r", MediaType::Photo),
            PathBuf::from("/data/media_queue/media_7_r.jpg")
        );
    }
}
