//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{Duration, Utc};

use vidscribe::config::EngineConfig;
use vidscribe::{JobRecord, JobStatus};

/// Builder for `EngineConfig` with millisecond backoffs and no progress ticker.
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.queue.worker_count = 2;
        config.retry.initial_backoff_ms = 10;
        config.retry.max_backoff_ms = 40;
        config.progress.publish_interval_ms = 0;
        Self { config }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.queue.worker_count = count;
        self
    }

    pub fn capacity(mut self, regular: usize, priority: usize) -> Self {
        self.config.queue.queue_capacity = regular;
        self.config.queue.priority_capacity = priority;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.retry.initial_backoff_ms = initial;
        self.config.retry.max_backoff_ms = max;
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.processing.job_timeout_secs = secs;
        self
    }

    pub fn stale_after_secs(mut self, secs: u64) -> Self {
        self.config.processing.stale_after_secs = secs;
        self
    }

    pub fn hung_after_secs(mut self, secs: u64) -> Self {
        self.config.monitor.hung_after_secs = secs;
        self
    }

    pub fn progress_interval_ms(mut self, ms: u64) -> Self {
        self.config.progress.publish_interval_ms = ms;
        self
    }

    pub fn auto_requeue(mut self, enabled: bool) -> Self {
        self.config.monitor.auto_requeue = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A `processing` record last touched `age` ago, as left behind by a crashed worker.
pub fn orphaned_processing(url: &str, age: Duration) -> JobRecord {
    let mut job = JobRecord::new(url, "base.en");
    job.mark_processing().expect("pending -> processing");
    job.updated_at = Utc::now() - age;
    assert_eq!(job.status, JobStatus::Processing);
    job
}
