//! Test harness running a full engine against a scripted backend.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use vidscribe::config::EngineConfig;
use vidscribe::{
    JobProgressBroadcaster, JobRecord, JobRepository, JobStatus, MemoryJobRepository,
    TranscriptionService,
};

use super::backend::ScriptedBackend;

/// How long `wait_for` polls before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns everything a running engine needs.
///
/// Field order matters: the service is dropped (and its workers joined)
/// before the runtime they block on.
pub struct TestHarness {
    pub service: TranscriptionService,
    pub repo: Arc<dyn JobRepository>,
    pub backend: Arc<ScriptedBackend>,
    pub progress: JobProgressBroadcaster,
    runtime: tokio::runtime::Runtime,
}

impl TestHarness {
    /// Engine over an in-memory repository.
    pub fn new(config: EngineConfig, backend: ScriptedBackend) -> Self {
        Self::with_repository(config, backend, Arc::new(MemoryJobRepository::new()))
    }

    pub fn with_repository(
        config: EngineConfig,
        backend: ScriptedBackend,
        repo: Arc<dyn JobRepository>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let backend = Arc::new(backend);
        let progress = JobProgressBroadcaster::new(256);

        let service = TranscriptionService::new(
            config,
            Arc::clone(&repo),
            backend.clone(),
            Arc::new(progress.clone()),
            runtime.handle().clone(),
        )
        .expect("Failed to start service");

        Self {
            service,
            repo,
            backend,
            progress,
            runtime,
        }
    }

    pub fn record(&self, id: &str) -> JobRecord {
        self.service.status(id).expect("record should exist")
    }

    /// Polls the record until `pred` holds.
    pub fn wait_for(&self, id: &str, pred: impl Fn(&JobRecord) -> bool) -> JobRecord {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = self.record(id);
            if pred(&job) {
                return job;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting on job {}: last seen {:?}", id, job);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn wait_for_status(&self, id: &str, status: JobStatus) -> JobRecord {
        self.wait_for(id, |job| job.status == status)
    }

    pub fn wait_terminal(&self, id: &str) -> JobRecord {
        self.wait_for(id, |job| job.status.is_terminal())
    }

    /// Waits until the backend has been called at least `n` times.
    pub fn wait_for_calls(&self, n: usize) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while self.backend.calls() < n {
            if Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} backend calls, saw {}",
                    n,
                    self.backend.calls()
                );
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
