use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::QueueConfig;
use crate::error::{CancelCause, EngineError, Result};
use crate::executor::ExecutionContext;
use crate::worker::task::{Priority, QueuedTask, TaskOutcome};

/// Runs one dequeued task to completion.
pub trait TaskProcessor: Send + Sync {
    fn process(&self, task: &QueuedTask) -> TaskOutcome;

    /// Called instead of a result when `process` panicked. Must leave the job
    /// record in a terminal state.
    fn recover(&self, task: &QueuedTask, panic_message: &str) -> TaskOutcome;
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub priority_depth: usize,
    pub regular_depth: usize,
    pub active_tasks: usize,
    pub workers: usize,
}

/// Where a registered task is, as seen by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub enqueued_at: Instant,
    /// When a worker picked the task up; `None` while it waits in a lane.
    pub started_at: Option<Instant>,
}

impl TaskStatus {
    /// Time since the task entered the queue.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// A registered task that has outlived the hung threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverdueTask {
    pub job_id: String,
    pub status: TaskStatus,
}

struct ActiveTask {
    task_id: String,
    ctx: ExecutionContext,
    enqueued_at: Instant,
    started_at: Option<Instant>,
}

impl ActiveTask {
    fn status(&self) -> TaskStatus {
        TaskStatus {
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
        }
    }
}

/// Tasks that are queued or running, keyed by job id.
#[derive(Default)]
struct TaskRegistry {
    tasks: Mutex<HashMap<String, ActiveTask>>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveTask>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Task registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn insert(&self, job_id: &str, task: ActiveTask) {
        if let Some(previous) = self.lock().insert(job_id.to_string(), task) {
            debug!(
                "Job {} re-registered, replacing task {}",
                job_id, previous.task_id
            );
        }
    }

    /// Removes the entry only if it still belongs to `task_id`.
    fn remove(&self, job_id: &str, task_id: &str) {
        let mut tasks = self.lock();
        if tasks.get(job_id).is_some_and(|t| t.task_id == task_id) {
            if let Some(task) = tasks.remove(job_id) {
                debug!(
                    "Job {} left the registry after {:?}",
                    job_id,
                    task.enqueued_at.elapsed()
                );
            }
        }
    }

    fn mark_started(&self, job_id: &str, task_id: &str) {
        if let Some(task) = self.lock().get_mut(job_id) {
            if task.task_id == task_id {
                task.started_at = Some(Instant::now());
            }
        }
    }

    fn status(&self, job_id: &str) -> Option<TaskStatus> {
        self.lock().get(job_id).map(ActiveTask::status)
    }

    /// Tasks registered longer than `age`, oldest first.
    fn overdue(&self, age: Duration) -> Vec<OverdueTask> {
        let mut overdue: Vec<OverdueTask> = self
            .lock()
            .iter()
            .filter(|(_, task)| task.enqueued_at.elapsed() > age)
            .map(|(job_id, task)| OverdueTask {
                job_id: job_id.clone(),
                status: task.status(),
            })
            .collect();
        overdue.sort_by_key(|task| task.status.enqueued_at);
        overdue
    }

    fn cancel(&self, job_id: &str, cause: CancelCause) -> bool {
        match self.lock().get(job_id) {
            Some(task) => {
                task.ctx.cancel(cause);
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self, cause: CancelCause) -> usize {
        let tasks = self.lock();
        for task in tasks.values() {
            task.ctx.cancel(cause);
        }
        tasks.len()
    }

    fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Two-lane bounded queue drained by a fixed set of worker threads.
pub struct JobQueue {
    priority_tx: Sender<QueuedTask>,
    regular_tx: Sender<QueuedTask>,
    priority_rx: Receiver<QueuedTask>,
    regular_rx: Receiver<QueuedTask>,
    registry: Arc<TaskRegistry>,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl JobQueue {
    /// Creates the lanes and spawns `config.worker_count` workers.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(config: &QueueConfig, processor: Arc<dyn TaskProcessor>) -> Self {
        assert!(config.worker_count > 0, "worker_count must be > 0");
        let (priority_tx, priority_rx) = bounded::<QueuedTask>(config.priority_capacity);
        let (regular_tx, regular_rx) = bounded::<QueuedTask>(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let registry = Arc::new(TaskRegistry::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);

        for worker_id in 0..config.worker_count {
            let lanes = Lanes {
                priority: priority_rx.clone(),
                regular: regular_rx.clone(),
                shutdown: shutdown_rx.clone(),
            };
            let registry = Arc::clone(&registry);
            let shutdown_flag = Arc::clone(&shutdown);
            let processor = Arc::clone(&processor);

            let handle = thread::Builder::new()
                .name(format!("vidscribe-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, lanes, registry, shutdown_flag, processor));

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            priority_tx,
            regular_tx,
            priority_rx,
            regular_rx,
            registry,
            shutdown,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker_count: workers.len(),
            workers: Mutex::new(workers),
        }
    }

    /// Admits a task without blocking.
    ///
    /// A full priority lane spills into the regular lane; a full regular lane
    /// rejects with `QueueFull`.
    pub fn enqueue(&self, task: QueuedTask) -> Result<()> {
        if self.is_shutdown() {
            return Err(EngineError::ShuttingDown);
        }

        let job_id = task.job_id.clone();
        let task_id = task.task_id.clone();
        self.registry.insert(
            &job_id,
            ActiveTask {
                task_id: task_id.clone(),
                ctx: task.ctx.clone(),
                enqueued_at: task.enqueued_at,
                started_at: None,
            },
        );

        let task = if task.priority == Priority::High {
            match self.priority_tx.try_send(task) {
                Ok(()) => {
                    debug!("Job {} admitted to priority lane", job_id);
                    return Ok(());
                }
                Err(TrySendError::Full(task)) => {
                    debug!("Priority lane full, job {} falls back to regular lane", job_id);
                    task
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.registry.remove(&job_id, &task_id);
                    return Err(EngineError::ShuttingDown);
                }
            }
        } else {
            task
        };

        match self.regular_tx.try_send(task) {
            Ok(()) => {
                debug!("Job {} admitted to regular lane", job_id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.registry.remove(&job_id, &task_id);
                warn!("Queue full, rejecting job {}", job_id);
                Err(EngineError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.registry.remove(&job_id, &task_id);
                Err(EngineError::ShuttingDown)
            }
        }
    }

    /// Cancels the queued or running task for `job_id`, if any.
    pub fn cancel(&self, job_id: &str, cause: CancelCause) -> bool {
        self.registry.cancel(job_id, cause)
    }

    /// True while a task for `job_id` is queued or running.
    pub fn is_active(&self, job_id: &str) -> bool {
        self.registry.contains(job_id)
    }

    /// Enqueue and start times of the task for `job_id`, if one is registered.
    pub fn task_status(&self, job_id: &str) -> Option<TaskStatus> {
        self.registry.status(job_id)
    }

    /// Queued or running tasks older than `hung_after`.
    pub fn overdue_tasks(&self, hung_after: Duration) -> Vec<OverdueTask> {
        self.registry.overdue(hung_after)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            priority_depth: self.priority_rx.len(),
            regular_depth: self.regular_rx.len(),
            active_tasks: self.registry.len(),
            workers: self.worker_count,
        }
    }

    /// Stops intake, wakes idle workers and cancels every registered task.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down job queue...");

        let sender = match self.shutdown_tx.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let cancelled = self.registry.cancel_all(CancelCause::Shutdown);
        if cancelled > 0 {
            info!("Cancelled {} active task(s)", cancelled);
        }
    }

    /// Joins every worker, then discards tasks that were never picked up.
    pub fn wait(&self) {
        let workers = match self.workers.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut dropped = 0;
        for task in self.priority_rx.try_iter().chain(self.regular_rx.try_iter()) {
            self.registry.remove(&task.job_id, &task.task_id);
            dropped += 1;
        }
        if dropped > 0 {
            info!("Discarded {} queued task(s) at shutdown", dropped);
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shutdown();
        self.wait();
    }
}

struct Lanes {
    priority: Receiver<QueuedTask>,
    regular: Receiver<QueuedTask>,
    shutdown: Receiver<()>,
}

impl Lanes {
    /// Prefers a ready priority task, otherwise blocks on whichever lane
    /// delivers first. `None` means the worker should exit.
    fn next(&self) -> Option<QueuedTask> {
        if let Ok(task) = self.priority.try_recv() {
            return Some(task);
        }
        select! {
            recv(self.priority) -> msg => msg.ok(),
            recv(self.regular) -> msg => msg.ok(),
            recv(self.shutdown) -> _ => None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(
    worker_id: usize,
    lanes: Lanes,
    registry: Arc<TaskRegistry>,
    shutdown: Arc<AtomicBool>,
    processor: Arc<dyn TaskProcessor>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let Some(task) = lanes.next() else {
            debug!("Worker {} lanes closed", worker_id);
            break;
        };

        debug!(
            "Worker {} processing job {} (waited {:?})",
            worker_id,
            task.job_id,
            task.enqueued_at.elapsed()
        );
        registry.mark_started(&task.job_id, &task.task_id);

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&task))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    "Worker {} panicked while processing job {}: {}",
                    worker_id, task.job_id, message
                );
                processor.recover(&task, &message)
            }
        };

        registry.remove(&task.job_id, &task.task_id);
        task.deliver(outcome);
    }

    debug!("Worker {} stopped", worker_id);
}
