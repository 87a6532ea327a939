//! Orchestration facade: admission, reuse and cancellation of jobs.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;

use crate::backend::TranscriptionBackend;
use crate::broadcast::{ProgressSink, ProgressTicker, ProgressUpdate};
use crate::config::{validate_config, EngineConfig};
use crate::error::{CancelCause, ConfigError, EngineError, Result};
use crate::executor::{ExecutionContext, RetryingExecutor};
use crate::job::{JobRecord, JobStatus};
use crate::locks::{RecordLock, ResourceLocks};
use crate::monitor::{self, MonitorPolicy, StaleJobHandler, StaleMonitor, SweepReport};
use crate::repository::JobRepository;
use crate::worker::{
    JobQueue, JobRunner, OverdueTask, Priority, QueueStats, QueuedTask, TaskHandle, TaskStatus,
};

/// What `submit` does with a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No record yet: create one and enqueue it.
    Create,
    /// Hand back the existing record untouched.
    ReuseExisting,
    /// Reset the existing record to `pending` and enqueue it again.
    Restart,
}

/// Reuse-or-restart policy for a submission.
///
/// `in_flight` is whether a task for the record is already queued or running.
pub fn decide(
    existing: Option<&JobRecord>,
    now: DateTime<Utc>,
    stale_after: Duration,
    in_flight: bool,
) -> Disposition {
    let Some(job) = existing else {
        return Disposition::Create;
    };
    match job.status {
        JobStatus::Completed => Disposition::ReuseExisting,
        JobStatus::Processing if job.is_stale(now, stale_after) => Disposition::Restart,
        JobStatus::Processing => Disposition::ReuseExisting,
        JobStatus::Pending if in_flight => Disposition::ReuseExisting,
        JobStatus::Pending | JobStatus::Failed | JobStatus::Cancelled => Disposition::Restart,
    }
}

struct ServiceInner {
    config: Arc<EngineConfig>,
    repo: Arc<dyn JobRepository>,
    progress: Arc<dyn ProgressSink>,
    queue: JobQueue,
    /// Shared with the workers; held for every read-decide-write on a record.
    records: RecordLock,
}

impl ServiceInner {
    fn admission(&self) -> MutexGuard<'_, ()> {
        self.records.lock()
    }

    fn publish(&self, job: &JobRecord) {
        self.progress
            .publish(ProgressUpdate::for_job(job, Utc::now(), &self.config.progress));
    }

    fn submit(
        &self,
        url: &str,
        priority: Priority,
        tracked: bool,
    ) -> Result<(JobRecord, Option<TaskHandle>)> {
        let _admission = self.admission();
        if self.queue.is_shutdown() {
            return Err(EngineError::ShuttingDown);
        }

        let existing = self.repo.get_by_url(url)?;
        let in_flight = existing
            .as_ref()
            .is_some_and(|job| self.queue.is_active(&job.id));
        let disposition = decide(
            existing.as_ref(),
            Utc::now(),
            self.config.processing.stale_after(),
            in_flight,
        );

        match (disposition, existing) {
            (Disposition::ReuseExisting, Some(job)) => {
                log::debug!("Reusing job {} ({}) for {}", job.id, job.status, url);
                Ok((job, None))
            }
            (Disposition::Restart, Some(job)) => self.restart_locked(job, priority, tracked),
            _ => {
                let job = JobRecord::new(url, &self.config.processing.default_model);
                log::info!("Created job {} for {}", job.id, url);
                self.repo.save(&job)?;
                self.admit_locked(job, priority, tracked)
            }
        }
    }

    /// Caller holds the admission lock.
    fn restart_locked(
        &self,
        mut job: JobRecord,
        priority: Priority,
        tracked: bool,
    ) -> Result<(JobRecord, Option<TaskHandle>)> {
        if job.status == JobStatus::Processing && self.queue.cancel(&job.id, CancelCause::Superseded)
        {
            log::info!("Superseding running task for job {}", job.id);
        }
        log::info!("Restarting job {} (was {})", job.id, job.status);
        job.reset_to_pending()?;
        self.repo.save(&job)?;
        self.admit_locked(job, priority, tracked)
    }

    /// Caller holds the admission lock. The record is already saved as `pending`.
    fn admit_locked(
        &self,
        mut job: JobRecord,
        priority: Priority,
        tracked: bool,
    ) -> Result<(JobRecord, Option<TaskHandle>)> {
        let (task, handle) = QueuedTask::new(&job, ExecutionContext::new(), priority, tracked);
        self.publish(&job);

        match self.queue.enqueue(task) {
            Ok(()) => Ok((job, handle)),
            Err(EngineError::QueueFull) => {
                job.fail("queue is full, try again later")?;
                self.repo.save(&job)?;
                self.publish(&job);
                Err(EngineError::QueueFull)
            }
            Err(e) => Err(e),
        }
    }

    fn cancel(&self, id: &str) -> Result<bool> {
        let _admission = self.admission();

        let Some(mut job) = self.repo.get(id)? else {
            return Ok(false);
        };
        if job.status != JobStatus::Processing {
            log::debug!("Job {} is {}, nothing to cancel", id, job.status);
            return Ok(false);
        }

        if self.queue.cancel(id, CancelCause::Requested) {
            log::info!("Cancellation requested for job {}", id);
            return Ok(true);
        }

        // Nothing is running it anymore; settle the record here.
        log::info!("Job {} has no live task, marking cancelled", id);
        job.cancel(&CancelCause::Requested.to_string())?;
        self.repo.save(&job)?;
        self.publish(&job);
        Ok(true)
    }
}

impl StaleJobHandler for ServiceInner {
    fn requeue(&self, observed: &JobRecord) -> Result<bool> {
        let _admission = self.admission();

        let Some(current) = self.repo.get(&observed.id)? else {
            return Ok(false);
        };
        if current.status != JobStatus::Processing || current.updated_at != observed.updated_at {
            return Ok(false);
        }
        self.restart_locked(current, Priority::Normal, false)?;
        Ok(true)
    }

    fn overdue_tasks(&self, hung_after: Duration) -> Vec<OverdueTask> {
        self.queue.overdue_tasks(hung_after)
    }
}

/// Entry point for submitting, inspecting and cancelling transcription jobs.
pub struct TranscriptionService {
    inner: Arc<ServiceInner>,
    monitor: Mutex<Option<StaleMonitor>>,
    ticker: Mutex<Option<ProgressTicker>>,
}

impl TranscriptionService {
    /// Validates `config`, spawns the worker pool, the stale monitor and the
    /// progress ticker.
    ///
    /// `runtime` must belong to a multi-threaded tokio runtime.
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn JobRepository>,
        backend: Arc<dyn TranscriptionBackend>,
        progress: Arc<dyn ProgressSink>,
        runtime: Handle,
    ) -> std::result::Result<Self, ConfigError> {
        validate_config(&config)?;
        let config = Arc::new(config);
        let records = RecordLock::new();

        let runner = JobRunner::new(
            Arc::clone(&repo),
            RetryingExecutor::new(backend, config.retry.clone()),
            Arc::new(ResourceLocks::new()),
            records.clone(),
            Arc::clone(&progress),
            Arc::clone(&config),
            runtime,
        );
        let queue = JobQueue::start(&config.queue, Arc::new(runner));

        let inner = Arc::new(ServiceInner {
            config: Arc::clone(&config),
            repo: Arc::clone(&repo),
            progress: Arc::clone(&progress),
            queue,
            records: records.clone(),
        });

        let ticker = match config.progress.publish_interval() {
            Some(interval) => {
                let live = Arc::clone(&inner);
                match ProgressTicker::start(
                    Arc::clone(&repo),
                    progress,
                    records,
                    config.progress.clone(),
                    interval,
                    Arc::new(move |id: &str| live.queue.is_active(id)),
                ) {
                    Ok(ticker) => Some(ticker),
                    Err(e) => {
                        log::error!("Failed to start progress ticker: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let monitor = match StaleMonitor::start(
            repo,
            inner.clone(),
            MonitorPolicy::from_config(&config),
            config.monitor.interval(),
        ) {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                log::error!("Failed to start stale monitor: {}", e);
                None
            }
        };

        log::info!(
            "Transcription service ready ({} workers, capacity {}+{})",
            config.queue.worker_count,
            config.queue.queue_capacity,
            config.queue.priority_capacity
        );

        Ok(Self {
            inner,
            monitor: Mutex::new(monitor),
            ticker: Mutex::new(ticker),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the record for `url`, creating or restarting it as needed.
    pub fn submit(&self, url: &str) -> Result<JobRecord> {
        self.submit_with_priority(url, Priority::Normal)
    }

    pub fn submit_with_priority(&self, url: &str, priority: Priority) -> Result<JobRecord> {
        self.inner.submit(url, priority, false).map(|(job, _)| job)
    }

    /// Like `submit_with_priority`, plus a handle to wait on when a task was queued.
    ///
    /// The handle is `None` when an existing record was reused.
    pub fn submit_tracked(
        &self,
        url: &str,
        priority: Priority,
    ) -> Result<(JobRecord, Option<TaskHandle>)> {
        self.inner.submit(url, priority, true)
    }

    /// Stops a `processing` job. Returns false if it was not cancellable.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        self.inner.cancel(id)
    }

    pub fn status(&self, id: &str) -> Result<JobRecord> {
        self.inner
            .repo
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Current progress estimate for `id`.
    pub fn progress(&self, id: &str) -> Result<ProgressUpdate> {
        let job = self.status(id)?;
        Ok(ProgressUpdate::for_job(
            &job,
            Utc::now(),
            &self.inner.config.progress,
        ))
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Enqueue and start times of the live task for `id`. `None` when no
    /// task is queued or running for it.
    pub fn task_status(&self, id: &str) -> Option<TaskStatus> {
        self.inner.queue.task_status(id)
    }

    /// Runs one stale sweep right away, outside the monitor's schedule.
    pub fn sweep_stale(&self) -> Result<SweepReport> {
        monitor::sweep(
            self.inner.repo.as_ref(),
            self.inner.as_ref(),
            &MonitorPolicy::from_config(&self.inner.config),
            Utc::now(),
        )
    }

    /// Stops the monitor and ticker, cancels running tasks and joins every worker.
    pub fn shutdown(&self) {
        let monitor = match self.monitor.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(monitor) = monitor {
            monitor.stop();
        }

        let ticker = match self.ticker.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(ticker) = ticker {
            ticker.stop();
        }

        self.inner.queue.shutdown();
        self.inner.queue.wait();
    }
}

impl Drop for TranscriptionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
