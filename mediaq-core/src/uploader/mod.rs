//! Upload collaborators.
//!
//! The queue never talks to the network itself: for every QUEUED entry it
//! hands the queued file to an [`Uploader`] and records whatever comes back.
//!
//! - [`HttpUploader`] - multipart POST to a photo/video endpoint
//! - [`MockUploader`] - scripted outcomes for tests and dry runs
//!
//! ## Quick Start
//!
//! ```no_run
//! use mediaq_core::uploader::{UploaderConfig, UploaderFactory};
//!
//! # fn example() -> mediaq_core::Result<()> {
//! let uploader = UploaderFactory::create(UploaderConfig::from_env())?;
//! println!("Uploading with {}", uploader.name());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
mod http;
mod mock;

#[cfg(feature = "http")]
pub use http::{is_transient_error, is_transient_status, parse_upload_response, HttpUploader, HttpUploaderConfig};
pub use mock::{MockOutcome, MockUploader};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::MediaType;

/// One upload attempt for a queued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub request_id: String,
    pub app_id: String,
    pub media_type: MediaType,
}

/// Transfers a queued file to the remote service.
///
/// `Ok(url)` is the success path; any `Err` is recorded on the entry as its
/// `lastError` and the file is kept for a later retry. Implementations own
/// their timeouts and any in-attempt retries. Must be thread-safe.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Attempt to upload the file, returning the remote URL.
    async fn upload(&self, request: &UploadRequest) -> Result<String>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}

/// Which uploader the owning service should build.
#[derive(Debug, Clone)]
pub enum UploaderConfig {
    #[cfg(feature = "http")]
    Http(HttpUploaderConfig),
    /// Always succeeds with a fake URL
    Mock,
}

impl UploaderConfig {
    /// HTTP uploader when its endpoints are configured, otherwise the mock.
    pub fn from_env() -> Self {
        #[cfg(feature = "http")]
        if let Ok(config) = HttpUploaderConfig::from_env() {
            return Self::Http(config);
        }
        tracing::warn!("No upload endpoint configured, falling back to mock uploader");
        Self::Mock
    }
}

/// Factory for creating uploaders.
pub struct UploaderFactory;

impl UploaderFactory {
    pub fn create(config: UploaderConfig) -> Result<Arc<dyn Uploader>> {
        match config {
            #[cfg(feature = "http")]
            UploaderConfig::Http(http_config) => Ok(Arc::new(HttpUploader::new(http_config)?)),
            UploaderConfig::Mock => Ok(Arc::new(MockUploader::new())),
        }
    }
}
