//! Periodic retry of failed uploads.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::MediaQueueManager;
use crate::config::RetryPolicy;
use crate::error::QueueError;

/// Background task that, once per interval, resets retryable FAILED entries
/// and kicks the queue. Stops when shut down or dropped.
#[derive(Debug)]
pub struct RetryScheduler {
    handle: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub(super) fn spawn(queue: MediaQueueManager, policy: RetryPolicy) -> Self {
        info!(
            interval_secs = policy.interval.as_secs(),
            max_retries = policy.max_retries,
            backoff = policy.backoff.is_some(),
            "Retry scheduler started"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = interval(policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the first pass waits a full period.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match queue
                    .try_retry_failed_uploads(policy.max_retries, policy.backoff)
                    .await
                {
                    Ok(reset) => debug!(reset, "Retry pass finished"),
                    Err(QueueError::WorkerStopped) => {
                        debug!("Queue worker stopped, retry scheduler exiting");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Retry pass failed"),
                }
                queue.process_queue();
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the scheduler and wait for its task to wind down.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Retry scheduler stopped");
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
