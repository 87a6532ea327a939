//! Periodic re-publication of estimates for running jobs.
//!
//! Transitions are published by whoever makes them. Between transitions a
//! running job's estimate still moves, so this pushes a fresh one on a
//! fixed period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::broadcast::{ProgressSink, ProgressUpdate};
use crate::config::ProgressConfig;
use crate::error::Result;
use crate::job::JobStatus;
use crate::locks::RecordLock;
use crate::periodic::PeriodicThread;
use crate::repository::JobRepository;

/// Answers whether a job still has a live task behind it.
pub type LivenessCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Publishes an estimate for every `processing` job that `is_live` accepts.
///
/// Runs under `records` so an update can never overtake the transition that
/// ends the job. Returns the number of updates published.
pub fn publish_running(
    repo: &dyn JobRepository,
    sink: &dyn ProgressSink,
    records: &RecordLock,
    config: &ProgressConfig,
    is_live: &dyn Fn(&str) -> bool,
    now: DateTime<Utc>,
) -> Result<usize> {
    let _records = records.lock();
    let mut published = 0;
    for job in repo.find_by_status(JobStatus::Processing)? {
        if !is_live(&job.id) {
            continue;
        }
        sink.publish(ProgressUpdate::for_job(&job, now, config));
        published += 1;
    }
    Ok(published)
}

pub struct ProgressTicker {
    thread: PeriodicThread,
}

impl ProgressTicker {
    pub fn start(
        repo: Arc<dyn JobRepository>,
        sink: Arc<dyn ProgressSink>,
        records: RecordLock,
        config: ProgressConfig,
        interval: Duration,
        is_live: LivenessCheck,
    ) -> std::io::Result<Self> {
        let thread = PeriodicThread::spawn("vidscribe-progress", interval, move || {
            if let Err(e) = publish_running(
                repo.as_ref(),
                sink.as_ref(),
                &records,
                &config,
                is_live.as_ref(),
                Utc::now(),
            ) {
                log::warn!("Progress tick failed: {}", e);
            }
        })?;

        log::debug!("Progress ticker running every {:?}", interval);
        Ok(Self { thread })
    }

    pub fn stop(&self) {
        self.thread.stop();
    }
}
