use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::progress::ProgressStage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            processing: ProcessingConfig::default(),
            monitor: MonitorConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the regular lane.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of the priority lane.
    #[serde(default = "default_priority_capacity")]
    pub priority_capacity: usize,
}

fn default_worker_count() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    50
}

fn default_priority_capacity() -> usize {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            priority_capacity: default_priority_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Overall deadline for one job execution, retries included.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// A `processing` job older than this is stale and may be restarted.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_chunk_length_secs")]
    pub chunk_length_secs: u32,
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_stale_after_secs() -> u64 {
    10 * 60
}

fn default_model() -> String {
    "base.en".to_string()
}

fn default_chunk_length_secs() -> u32 {
    120
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            default_model: default_model(),
            chunk_length_secs: default_chunk_length_secs(),
        }
    }
}

impl ProcessingConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// Alert-only threshold, longer than the stale timeout.
    #[serde(default = "default_hung_after_secs")]
    pub hung_after_secs: u64,
    /// Reset stale jobs to `pending` and resubmit them.
    #[serde(default)]
    pub auto_requeue: bool,
}

fn default_monitor_interval_secs() -> u64 {
    5 * 60
}

fn default_hung_after_secs() -> u64 {
    30 * 60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            hung_after_secs: default_hung_after_secs(),
            auto_requeue: false,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn hung_after(&self) -> Duration {
        Duration::from_secs(self.hung_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Expected wall-clock duration of a typical job.
    #[serde(default = "default_total_estimate_secs")]
    pub total_estimate_secs: u64,
    /// Ordered processing stages. Each ends at the given elapsed time with the given fraction.
    #[serde(default = "default_stages")]
    pub stages: Vec<StageBoundary>,
    /// How often running jobs get a fresh estimate pushed to subscribers.
    /// 0 publishes on state transitions only.
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageBoundary {
    pub stage: ProgressStage,
    pub ends_at_secs: u64,
    pub ends_at_fraction: f64,
}

fn default_total_estimate_secs() -> u64 {
    10 * 60
}

fn default_publish_interval_ms() -> u64 {
    2_000
}

fn default_stages() -> Vec<StageBoundary> {
    let stage = |stage, ends_at_secs, ends_at_fraction| StageBoundary {
        stage,
        ends_at_secs,
        ends_at_fraction,
    };
    vec![
        stage(ProgressStage::Preparing, 15, 0.05),
        stage(ProgressStage::Downloading, 30, 0.15),
        stage(ProgressStage::ExtractingAudio, 45, 0.25),
        stage(ProgressStage::Analyzing, 120, 0.40),
        stage(ProgressStage::Transcribing, 300, 0.70),
        stage(ProgressStage::Finalizing, 600, 0.95),
    ]
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            total_estimate_secs: default_total_estimate_secs(),
            stages: default_stages(),
            publish_interval_ms: default_publish_interval_ms(),
        }
    }
}

impl ProgressConfig {
    /// `None` when periodic publishing is off.
    pub fn publish_interval(&self) -> Option<Duration> {
        (self.publish_interval_ms > 0).then(|| Duration::from_millis(self.publish_interval_ms))
    }
}
