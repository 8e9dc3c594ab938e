//! Mock uploader for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{UploadRequest, Uploader};
use crate::error::{QueueError, Result};

const DEFAULT_BASE_URL: &str = "https://mock.invalid/media";

/// What the mock answers for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Succeed with `<base_url>/<requestId>.<ext>`
    Succeed,
    /// Fail with the given message
    Fail(String),
}

/// Deterministic uploader.
/// WARNING: nothing leaves the machine; URLs it returns point nowhere.
///
/// Outcomes are taken from a script first and fall back to a default once the
/// script is exhausted. A gated mock holds every upload until [`release`]
/// lets it through, which keeps entries observable in UPLOADING.
///
/// [`release`]: MockUploader::release
pub struct MockUploader {
    base_url: String,
    default_outcome: MockOutcome,
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<UploadRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockUploader {
    /// A mock that succeeds for every upload.
    pub fn new() -> Self {
        Self::with_default(MockOutcome::Succeed)
    }

    /// A mock that fails every upload with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_default(MockOutcome::Fail(message.into()))
    }

    fn with_default(default_outcome: MockOutcome) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_outcome,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Answer the next uploads with `outcomes`, in order.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Hold every upload until released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `count` held uploads complete. No-op for an ungated mock.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<UploadRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// URL the mock reports for a successful upload.
    pub fn url_for(&self, request: &UploadRequest) -> String {
        format!(
            "{}/{}.{}",
            self.base_url,
            request.request_id,
            request.media_type.extension()
        )
    }
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<String> {
        lock(&self.calls).push(request.clone());

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| QueueError::Upload("Mock upload gate closed".into()))?
                .forget();
        }

        if !tokio::fs::try_exists(&request.path).await.unwrap_or(false) {
            return Err(QueueError::Upload(format!(
                "Media file does not exist: {}",
                request.path.display()
            )));
        }

        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone());

        match outcome {
            MockOutcome::Succeed => Ok(self.url_for(request)),
            MockOutcome::Fail(message) => Err(QueueError::Upload(message)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
