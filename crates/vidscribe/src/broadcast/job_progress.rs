//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::ProgressConfig;
use crate::job::{JobRecord, JobStatus};
use crate::progress::{self, ProgressStage};

/// Progress update pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Job identifier.
    pub id: String,
    /// Current job status.
    pub status: JobStatus,
    /// Estimated fraction done, in `[0, 1]`.
    pub progress: f64,
    /// Current stage of processing.
    pub stage: ProgressStage,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Rough estimate of the remaining time.
    pub estimated_seconds_remaining: u64,
    /// Error message (set on failure or cancellation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Timestamp of this update.
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Builds an update for `job` as of `now`.
    pub fn for_job(job: &JobRecord, now: DateTime<Utc>, config: &ProgressConfig) -> Self {
        let estimate = progress::estimate(job.status, job.created_at, now, config);
        Self {
            id: job.id.clone(),
            status: job.status,
            progress: estimate.progress,
            stage: estimate.stage,
            message: estimate.message,
            estimated_seconds_remaining: estimate.estimated_seconds_remaining,
            error: job.error_message.clone(),
            timestamp: now,
        }
    }
}

/// Destination for progress updates. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: ProgressUpdate);
}

/// Sink that drops everything.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn publish(&self, _update: ProgressUpdate) {}
}

/// Broadcasts job progress updates for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressUpdate>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a new subscriber for progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ProgressSink for JobProgressBroadcaster {
    fn publish(&self, update: ProgressUpdate) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(update);
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
