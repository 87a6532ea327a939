use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionContext;
use crate::job::{JobRecord, JobStatus};

/// Queue lane selector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Final word from a worker about one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Unit of work travelling through the queue. Never persisted.
pub struct QueuedTask {
    /// Distinguishes successive tasks for the same job.
    pub task_id: String,
    pub job_id: String,
    pub url: String,
    pub ctx: ExecutionContext,
    pub priority: Priority,
    pub enqueued_at: Instant,
    result_tx: Option<Sender<TaskOutcome>>,
}

impl QueuedTask {
    /// Builds a task for `job`. With `tracked`, also returns the handle that
    /// receives the outcome.
    pub fn new(
        job: &JobRecord,
        ctx: ExecutionContext,
        priority: Priority,
        tracked: bool,
    ) -> (Self, Option<TaskHandle>) {
        let (result_tx, handle) = if tracked {
            let (tx, rx) = bounded(1);
            (
                Some(tx),
                Some(TaskHandle {
                    job_id: job.id.clone(),
                    rx,
                }),
            )
        } else {
            (None, None)
        };

        let task = Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            url: job.url.clone(),
            ctx,
            priority,
            enqueued_at: Instant::now(),
            result_tx,
        };
        (task, handle)
    }

    /// Hands the outcome to whoever holds the handle. Dropped if nobody does.
    pub(crate) fn deliver(&self, outcome: TaskOutcome) {
        if let Some(tx) = &self.result_tx {
            if tx.try_send(outcome).is_err() {
                log::debug!("No listener for outcome of job {}", self.job_id);
            }
        }
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("task_id", &self.task_id)
            .field("job_id", &self.job_id)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Receiving end of a tracked submission.
#[derive(Debug)]
pub struct TaskHandle {
    job_id: String,
    rx: Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Blocks until the task finishes. `None` if it was dropped unprocessed.
    pub fn wait(self) -> Option<TaskOutcome> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        self.rx.try_recv().ok()
    }
}
