//! Per-task processing: lock the URL, drive the record through its states,
//! run the backend and persist the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::runtime::Handle;

use crate::backend::{BackendOutput, TranscribeOptions};
use crate::broadcast::{ProgressSink, ProgressUpdate};
use crate::config::EngineConfig;
use crate::error::{CancelCause, EngineError, Result};
use crate::executor::RetryingExecutor;
use crate::job::{JobRecord, JobStatus};
use crate::locks::{RecordLock, ResourceLocks};
use crate::repository::JobRepository;
use crate::worker::pool::TaskProcessor;
use crate::worker::task::{QueuedTask, TaskOutcome};

/// How a task ended, before it is wrapped into a [`TaskOutcome`].
struct Settled {
    status: JobStatus,
    error: Option<String>,
}

impl Settled {
    fn from_job(job: &JobRecord) -> Self {
        Self {
            status: job.status,
            error: job.error_message.clone(),
        }
    }
}

enum Start {
    Run(JobRecord),
    Skip(Settled),
}

pub struct JobRunner {
    repo: Arc<dyn JobRepository>,
    executor: RetryingExecutor,
    locks: Arc<ResourceLocks>,
    records: RecordLock,
    progress: Arc<dyn ProgressSink>,
    config: Arc<EngineConfig>,
    runtime: Handle,
}

impl JobRunner {
    /// `runtime` must belong to a multi-threaded tokio runtime; workers call
    /// `block_on` on it from their own threads.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        executor: RetryingExecutor,
        locks: Arc<ResourceLocks>,
        records: RecordLock,
        progress: Arc<dyn ProgressSink>,
        config: Arc<EngineConfig>,
        runtime: Handle,
    ) -> Self {
        Self {
            repo,
            executor,
            locks,
            records,
            progress,
            config,
            runtime,
        }
    }

    fn publish(&self, job: &JobRecord) {
        self.progress
            .publish(ProgressUpdate::for_job(job, Utc::now(), &self.config.progress));
    }

    fn persist(&self, job: &JobRecord) -> Result<()> {
        self.repo.save(job)?;
        self.publish(job);
        Ok(())
    }

    fn load(&self, job_id: &str) -> Result<JobRecord> {
        self.repo
            .get(job_id)?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    fn timeout_message(&self) -> String {
        format!(
            "processing timed out after {}s",
            self.config.processing.job_timeout_secs
        )
    }

    async fn run(&self, task: &QueuedTask) -> Result<Settled> {
        let ctx = task.ctx.with_deadline(self.config.processing.job_timeout());

        let acquired = tokio::select! {
            biased;
            cause = ctx.done() => Err(cause),
            guard = self.locks.acquire(&task.url) => Ok(guard),
        };

        let _guard = match acquired {
            Ok(guard) => guard,
            Err(cause) => {
                log::info!(
                    "Job {} stopped while waiting for {}: {}",
                    task.job_id,
                    task.url,
                    cause
                );
                return self.settle(task, None, Err(EngineError::Cancelled(cause)));
            }
        };

        let started = match self.start(task)? {
            Start::Run(job) => job,
            Start::Skip(settled) => return Ok(settled),
        };

        let options = TranscribeOptions::new(
            self.config.processing.default_model.clone(),
            u64::from(self.config.processing.chunk_length_secs),
        );
        let result = self.executor.execute(&ctx, &task.url, &options).await;
        self.settle(task, Some(&started), result)
    }

    /// Moves a `pending` record to `processing` under the record lock.
    fn start(&self, task: &QueuedTask) -> Result<Start> {
        let _records = self.records.lock();
        let mut job = self.load(&task.job_id)?;

        if job.status != JobStatus::Pending {
            log::info!(
                "Job {} is {} by the time its task ran, skipping",
                job.id,
                job.status
            );
            return Ok(Start::Skip(Settled::from_job(&job)));
        }

        job.mark_processing()?;
        self.persist(&job)?;
        Ok(Start::Run(job))
    }

    /// Applies an execution result to the record and persists it.
    ///
    /// `started` is the `processing` record this task wrote, or `None` if the
    /// task never started. The record is only written while it is still the
    /// one this task left behind; a superseded task leaves it alone.
    fn settle(
        &self,
        task: &QueuedTask,
        started: Option<&JobRecord>,
        result: Result<BackendOutput>,
    ) -> Result<Settled> {
        let _records = self.records.lock();
        let mut job = self.load(&task.job_id)?;

        let owned = match started {
            Some(started) => {
                job.status == JobStatus::Processing && job.updated_at == started.updated_at
            }
            None => job.status == JobStatus::Pending,
        };
        let superseded = task.ctx.cause() == Some(CancelCause::Superseded)
            || matches!(result, Err(EngineError::Cancelled(CancelCause::Superseded)));

        if superseded || (!owned && started.is_some()) {
            log::info!("Job {} superseded by a newer task, dropping result", job.id);
            return Ok(Settled {
                status: JobStatus::Cancelled,
                error: Some(CancelCause::Superseded.to_string()),
            });
        }
        if !owned {
            return Ok(Settled::from_job(&job));
        }

        match result {
            Ok(output) => {
                log::info!("Job {} completed ({} chars)", job.id, output.text.len());
                job.complete(&output.text, &output.model)?;
            }
            Err(EngineError::Cancelled(CancelCause::DeadlineExceeded)) => {
                log::warn!("Job {} exceeded its deadline", job.id);
                job.fail(&self.timeout_message())?;
            }
            Err(EngineError::Cancelled(cause)) => {
                log::info!("Job {} {}", job.id, cause);
                job.cancel(&cause.to_string())?;
            }
            Err(e) => {
                log::error!("Job {} failed: {}", job.id, e);
                job.fail(&e.to_string())?;
            }
        }

        self.persist(&job)?;
        Ok(Settled::from_job(&job))
    }

    /// Best-effort move of a non-terminal record to `failed`.
    fn force_fail(&self, job_id: &str, message: &str) {
        let _records = self.records.lock();
        let mut job = match self.repo.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                log::error!("Could not load job {} to record failure: {}", job_id, e);
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        if let Err(e) = job.fail(message) {
            log::error!("Could not mark job {} failed: {}", job_id, e);
            return;
        }
        if let Err(e) = self.persist(&job) {
            log::error!("Could not persist failure of job {}: {}", job_id, e);
        }
    }
}

impl TaskProcessor for JobRunner {
    fn process(&self, task: &QueuedTask) -> TaskOutcome {
        let span = tracing::info_span!("job", id = %task.job_id, url = %task.url);
        let _enter = span.enter();
        let started = Instant::now();

        let settled = match self.runtime.block_on(self.run(task)) {
            Ok(settled) => settled,
            Err(e) => {
                log::error!("Processing job {} aborted: {}", task.job_id, e);
                let message = format!("processing aborted: {}", e);
                self.force_fail(&task.job_id, &message);
                Settled {
                    status: JobStatus::Failed,
                    error: Some(message),
                }
            }
        };

        TaskOutcome {
            job_id: task.job_id.clone(),
            status: settled.status,
            error: settled.error,
            duration: started.elapsed(),
        }
    }

    fn recover(&self, task: &QueuedTask, panic_message: &str) -> TaskOutcome {
        let message = format!("internal error: {}", panic_message);
        self.force_fail(&task.job_id, &message);
        TaskOutcome {
            job_id: task.job_id.clone(),
            status: JobStatus::Failed,
            error: Some(message),
            duration: task.enqueued_at.elapsed(),
        }
    }
}
