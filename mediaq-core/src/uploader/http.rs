//! HTTP uploader with retry, backoff, and bearer authentication.
//!
//! Sends each queued file as `multipart/form-data` with two parts:
//! `file` (the media bytes) and `metadata` (a JSON description of the
//! capture). The server answers `{"url": "..."}` on success.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{UploadRequest, Uploader};
use crate::error::{QueueError, Result};
use crate::media::{now_millis, MediaType};

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default whole-request timeout (large videos need the headroom).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries after the first attempt for transient errors within one upload.
const MAX_RETRIES: u32 = 3;

/// Initial retry interval.
const INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum retry interval.
const MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Device id sent when none is configured.
const DEFAULT_DEVICE_ID: &str = "mediaq";

/// Configuration for the HTTP uploader.
#[derive(Clone)]
pub struct HttpUploaderConfig {
    /// Endpoint receiving photos
    pub photo_url: String,
    /// Endpoint receiving videos
    pub video_url: String,
    /// Bearer token; uploads fail without one
    pub auth_token: Option<String>,
    /// Device identifier included in the upload metadata
    pub device_id: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt for transient errors; the attempt
    /// after the last retry is final whatever its outcome
    pub max_retries: u32,
    /// Initial retry interval
    pub initial_interval: Duration,
    /// Maximum retry interval
    pub max_interval: Duration,
    /// Refuse plain-HTTP endpoints
    pub https_only: bool,
}

impl std::fmt::Debug for HttpUploaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUploaderConfig")
            .field("photo_url", &self.photo_url)
            .field("video_url", &self.video_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("https_only", &self.https_only)
            .finish()
    }
}

impl HttpUploaderConfig {
    /// Configuration with default timeouts and no token.
    pub fn new(photo_url: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            photo_url: photo_url.into(),
            video_url: video_url.into(),
            auth_token: None,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            initial_interval: INITIAL_INTERVAL,
            max_interval: MAX_INTERVAL,
            https_only: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required: `MEDIAQ_PHOTO_UPLOAD_URL`, `MEDIAQ_VIDEO_UPLOAD_URL`
    /// Optional: `MEDIAQ_AUTH_TOKEN`, `MEDIAQ_DEVICE_ID`,
    /// `MEDIAQ_UPLOAD_TIMEOUT_SECS`, `MEDIAQ_ALLOW_HTTP`
    pub fn from_env() -> Result<Self> {
        let photo_url = std::env::var("MEDIAQ_PHOTO_UPLOAD_URL").map_err(|_| {
            QueueError::Config("MEDIAQ_PHOTO_UPLOAD_URL environment variable not set".into())
        })?;
        let video_url = std::env::var("MEDIAQ_VIDEO_UPLOAD_URL").map_err(|_| {
            QueueError::Config("MEDIAQ_VIDEO_UPLOAD_URL environment variable not set".into())
        })?;

        let mut config = Self::new(photo_url, video_url);

        config.auth_token = std::env::var("MEDIAQ_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        if let Ok(device_id) = std::env::var("MEDIAQ_DEVICE_ID") {
            config.device_id = device_id;
        }

        if let Some(secs) = std::env::var("MEDIAQ_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }

        config.https_only = std::env::var("MEDIAQ_ALLOW_HTTP")
            .map(|v| v.to_lowercase() != "true")
            .unwrap_or(true);

        Ok(config)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn endpoint(&self, media_type: MediaType) -> &str {
        match media_type {
            MediaType::Photo => &self.photo_url,
            MediaType::Video => &self.video_url,
        }
    }
}

/// Upload endpoint response.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Uploads queued media to the photo/video endpoints.
pub struct HttpUploader {
    client: Client,
    config: HttpUploaderConfig,
}

impl HttpUploader {
    /// Create a new HTTP uploader.
    #[instrument(level = "debug", skip_all, fields(photo_url = %config.photo_url, video_url = %config.video_url))]
    pub fn new(config: HttpUploaderConfig) -> Result<Self> {
        debug!("Creating HTTP uploader");

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .https_only(config.https_only)
            .build()
            .map_err(|e| QueueError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Send one multipart request (single attempt).
    async fn upload_once(
        &self,
        request: &UploadRequest,
        token: &str,
        bytes: &[u8],
    ) -> std::result::Result<String, backoff::Error<QueueError>> {
        let url = self.config.endpoint(request.media_type);
        let start = Instant::now();

        let file_name = request
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();

        let metadata = serde_json::json!({
            "requestId": request.request_id,
            "deviceId": self.config.device_id,
            "timestamp": now_millis(),
            "mediaType": request.media_type.label(),
        });

        let file_part = Part::bytes(bytes.to_vec())
            .file_name(file_name)
            .mime_str(request.media_type.mime_type())
            .map_err(|e| {
                backoff::Error::permanent(QueueError::Upload(format!(
                    "Error preparing upload request: {e}"
                )))
            })?;

        let form = Form::new()
            .part("file", file_part)
            .text("metadata", metadata.to_string());

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                let latency_ms = start.elapsed().as_millis() as u64;
                if is_transient_error(&e) {
                    warn!(error = %e, latency_ms, "Transient error, will retry");
                    backoff::Error::transient(QueueError::Upload(format!(
                        "Network error during upload: {e}"
                    )))
                } else {
                    warn!(error = %e, latency_ms, "Permanent error, aborting");
                    backoff::Error::permanent(QueueError::Upload(format!(
                        "Network error during upload: {e}"
                    )))
                }
            })?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");

        if !status.is_success() {
            let err = QueueError::Upload(format!("Server error: {}", status.as_u16()));
            return if is_transient_status(status) {
                warn!(status = %status, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(err))
            } else {
                warn!(status = %status, "Permanent HTTP error");
                Err(backoff::Error::permanent(err))
            };
        }

        let body = response.text().await.map_err(|e| {
            backoff::Error::permanent(QueueError::Upload(format!(
                "Error processing server response: {e}"
            )))
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Upload request completed"
        );

        parse_upload_response(&body).map_err(backoff::Error::permanent)
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            // Overall ceiling; the attempt count is enforced by `cap_attempts`.
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries.saturating_add(1)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    #[instrument(
        level = "info",
        skip(self, request),
        fields(request_id = %request.request_id, media_type = %request.media_type)
    )]
    async fn upload(&self, request: &UploadRequest) -> Result<String> {
        let token = self
            .config
            .auth_token
            .as_deref()
            .ok_or_else(|| QueueError::Upload("No authentication token available".into()))?;

        let bytes = tokio::fs::read(&request.path).await.map_err(|_| {
            QueueError::Upload(format!(
                "Media file does not exist: {}",
                request.path.display()
            ))
        })?;

        let start = Instant::now();
        let attempts = AtomicU32::new(0);
        let result = retry_notify(
            self.build_backoff(),
            || async {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let result = self.upload_once(request, token, &bytes).await;
                cap_attempts(result, attempt, self.config.max_retries)
            },
            |err: QueueError, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await;

        let total_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(url) => info!(total_latency_ms = total_ms, url = %url, "Media upload successful"),
            Err(e) => warn!(error = %e, total_latency_ms = total_ms, "Media upload failed"),
        }

        result
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Turn a transient failure permanent once `attempt` has used up the retries.
///
/// `attempt` counts from 1, so at most `max_retries + 1` requests are sent.
fn cap_attempts<T>(
    result: std::result::Result<T, backoff::Error<QueueError>>,
    attempt: u32,
    max_retries: u32,
) -> std::result::Result<T, backoff::Error<QueueError>> {
    match result {
        Err(backoff::Error::Transient { err, .. }) if attempt > max_retries => {
            warn!(attempt, max_retries, "Retry budget exhausted");
            Err(backoff::Error::permanent(err))
        }
        other => other,
    }
}

/// Extract the media URL from an upload response body.
pub fn parse_upload_response(body: &str) -> Result<String> {
    let response: UploadResponse = serde_json::from_str(body).map_err(|e| {
        QueueError::Upload(format!("Error processing server response: {e}"))
    })?;

    response
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| QueueError::Upload("Invalid server response - missing URL".into()))
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}
