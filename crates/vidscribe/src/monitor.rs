//! Periodic sweep for jobs stuck in `processing`.
//!
//! A job is *stale* once its last update is older than the processing
//! timeout, and *hung* once it passes the longer alert threshold. Both are
//! logged; they are only requeued when the policy opts in. Queue tasks
//! registered for longer than the hung threshold are reported as overdue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::job::{JobRecord, JobStatus};
use crate::periodic::PeriodicThread;
use crate::repository::JobRepository;
use crate::worker::OverdueTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Healthy,
    Stale,
    Hung,
}

/// Thresholds and remediation switch for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub stale_after: Duration,
    pub hung_after: Duration,
    pub auto_requeue: bool,
}

impl MonitorPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            stale_after: config.processing.stale_after(),
            hung_after: config.monitor.hung_after(),
            auto_requeue: config.monitor.auto_requeue,
        }
    }
}

pub fn classify(
    job: &JobRecord,
    now: DateTime<Utc>,
    stale_after: Duration,
    hung_after: Duration,
) -> Staleness {
    if job.is_stale(now, hung_after) {
        Staleness::Hung
    } else if job.is_stale(now, stale_after) {
        Staleness::Stale
    } else {
        Staleness::Healthy
    }
}

/// Puts a stuck job back in the queue and reports on live tasks.
pub trait StaleJobHandler: Send + Sync {
    /// Returns false when the job changed since it was observed and was left alone.
    fn requeue(&self, job: &JobRecord) -> Result<bool>;

    /// Queued or running tasks registered for longer than `hung_after`.
    fn overdue_tasks(&self, _hung_after: Duration) -> Vec<OverdueTask> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub stale: usize,
    pub hung: usize,
    pub requeued: usize,
    pub overdue_tasks: usize,
}

/// One pass over every `processing` job.
pub fn sweep(
    repo: &dyn JobRepository,
    handler: &dyn StaleJobHandler,
    policy: &MonitorPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for job in repo.find_by_status(JobStatus::Processing)? {
        report.checked += 1;
        let age_secs = job.age(now).num_seconds();

        match classify(&job, now, policy.stale_after, policy.hung_after) {
            Staleness::Healthy => continue,
            Staleness::Stale => {
                report.stale += 1;
                log::warn!(
                    "Job {} ({}) stale: processing for {}s",
                    job.id,
                    job.url,
                    age_secs
                );
            }
            Staleness::Hung => {
                report.hung += 1;
                log::warn!(
                    "Job {} ({}) appears hung: processing for {}s",
                    job.id,
                    job.url,
                    age_secs
                );
            }
        }

        if policy.auto_requeue {
            match handler.requeue(&job) {
                Ok(true) => {
                    report.requeued += 1;
                    log::info!("Requeued job {}", job.id);
                }
                Ok(false) => log::debug!("Job {} changed during sweep, left alone", job.id),
                Err(e) => log::error!("Failed to requeue job {}: {}", job.id, e),
            }
        }
    }

    for task in handler.overdue_tasks(policy.hung_after) {
        report.overdue_tasks += 1;
        match task.status.started_at {
            Some(started) => log::warn!(
                "Task for job {} appears hung: running for {}s",
                task.job_id,
                started.elapsed().as_secs()
            ),
            None => log::warn!(
                "Task for job {} appears hung: queued for {}s without a worker",
                task.job_id,
                task.status.age().as_secs()
            ),
        }
    }

    Ok(report)
}

/// Background thread running [`sweep`] on a fixed period.
pub struct StaleMonitor {
    thread: PeriodicThread,
}

impl StaleMonitor {
    pub fn start(
        repo: Arc<dyn JobRepository>,
        handler: Arc<dyn StaleJobHandler>,
        policy: MonitorPolicy,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let thread = PeriodicThread::spawn("vidscribe-monitor", interval, move || {
            match sweep(repo.as_ref(), handler.as_ref(), &policy, Utc::now()) {
                Ok(report) if report.stale + report.hung + report.overdue_tasks > 0 => {
                    log::info!(
                        "Stale sweep: {} checked, {} stale, {} hung, {} requeued, {} overdue task(s)",
                        report.checked,
                        report.stale,
                        report.hung,
                        report.requeued,
                        report.overdue_tasks
                    );
                }
                Ok(_) => {}
                Err(e) => log::error!("Stale sweep failed: {}", e),
            }
        })?;

        log::info!("Stale monitor running every {:?}", interval);
        Ok(Self { thread })
    }

    /// Signals the thread and waits for it. Safe to call more than once.
    pub fn stop(&self) {
        self.thread.stop();
    }
}
