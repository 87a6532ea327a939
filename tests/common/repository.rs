//! Repository wrapper that can park a save until the test lets it through.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use vidscribe::{JobRecord, JobRepository, JobStatus, MemoryJobRepository, RepositoryError};

/// Holds the first save of a record in `hold_status` until `release` is called.
pub struct GatedRepository {
    inner: MemoryJobRepository,
    hold_status: JobStatus,
    armed: AtomicBool,
    reached_tx: Sender<()>,
    reached_rx: Receiver<()>,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl GatedRepository {
    pub fn holding(status: JobStatus) -> Self {
        let (reached_tx, reached_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        Self {
            inner: MemoryJobRepository::new(),
            hold_status: status,
            armed: AtomicBool::new(true),
            reached_tx,
            reached_rx,
            release_tx,
            release_rx,
        }
    }

    /// Blocks until a save is parked.
    pub fn wait_until_held(&self, timeout: Duration) {
        self.reached_rx
            .recv_timeout(timeout)
            .expect("no save was held in time");
    }

    pub fn release(&self) {
        let _ = self.release_tx.send(());
    }

    /// Writes straight through, never parked.
    pub fn save_ungated(&self, job: &JobRecord) {
        self.inner.save(job).expect("memory save");
    }
}

impl JobRepository for GatedRepository {
    fn save(&self, job: &JobRecord) -> Result<(), RepositoryError> {
        if job.status == self.hold_status && self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.reached_tx.send(());
            let _ = self.release_rx.recv();
        }
        self.inner.save(job)
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, RepositoryError> {
        self.inner.get(id)
    }

    fn get_by_url(&self, url: &str) -> Result<Option<JobRecord>, RepositoryError> {
        self.inner.get_by_url(url)
    }

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, RepositoryError> {
        self.inner.find_by_status(status)
    }
}
