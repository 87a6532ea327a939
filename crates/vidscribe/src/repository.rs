//! Storage seam for job records.
//!
//! `save` has upsert-on-URL semantics: storing a record whose URL already
//! belongs to another id replaces that record, so at most one record per URL
//! ever exists.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::RepositoryError;
use crate::job::{JobRecord, JobStatus};

pub trait JobRepository: Send + Sync {
    fn save(&self, job: &JobRecord) -> Result<(), RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<JobRecord>, RepositoryError>;

    fn get_by_url(&self, url: &str) -> Result<Option<JobRecord>, RepositoryError>;

    /// All records currently in `status`, oldest update first.
    fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, RepositoryError>;
}

#[derive(Default)]
struct MemoryState {
    by_id: HashMap<String, JobRecord>,
    id_by_url: HashMap<String, String>,
}

/// In-process repository for tests and embedders that bring their own persistence.
#[derive(Default)]
pub struct MemoryJobRepository {
    state: RwLock<MemoryState>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        match self.state.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Memory repository lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Memory repository lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl JobRepository for MemoryJobRepository {
    fn save(&self, job: &JobRecord) -> Result<(), RepositoryError> {
        let mut state = self.write();
        if let Some(previous_id) = state.id_by_url.get(&job.url).cloned() {
            if previous_id != job.id {
                state.by_id.remove(&previous_id);
            }
        }
        state.id_by_url.insert(job.url.clone(), job.id.clone());
        state.by_id.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, RepositoryError> {
        Ok(self.read().by_id.get(id).cloned())
    }

    fn get_by_url(&self, url: &str) -> Result<Option<JobRecord>, RepositoryError> {
        let state = self.read();
        Ok(state
            .id_by_url
            .get(url)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, RepositoryError> {
        let mut jobs: Vec<JobRecord> = self
            .read()
            .by_id
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(jobs)
    }
}
