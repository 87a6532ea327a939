//! Job repository: persistence of job records in the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::error::RepositoryError;
use crate::job::{JobRecord, JobStatus};
use crate::repository::JobRepository;

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    url: String,
    status: String,
    result_text: Option<String>,
    error_message: Option<String>,
    model_identifier: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            url: row.get("url")?,
            status: row.get("status")?,
            result_text: row.get("result_text")?,
            error_message: row.get("error_message")?,
            model_identifier: row.get("model_identifier")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn from_record(job: &JobRecord) -> Self {
        Self {
            id: job.id.clone(),
            url: job.url.clone(),
            status: job.status.as_str().to_string(),
            result_text: job.result_text.clone(),
            error_message: job.error_message.clone(),
            model_identifier: job.model_identifier.clone(),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        }
    }

    fn into_record(self) -> Result<JobRecord, DatabaseError> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| DatabaseError::InvalidRow {
            id: self.id.clone(),
            reason: format!("unknown status '{}'", self.status),
        })?;
        let created_at = parse_timestamp(&self.created_at, &self.id)?;
        let updated_at = parse_timestamp(&self.updated_at, &self.id)?;

        Ok(JobRecord {
            id: self.id,
            url: self.url,
            status,
            result_text: self.result_text,
            error_message: self.error_message,
            created_at,
            updated_at,
            model_identifier: self.model_identifier,
        })
    }
}

fn parse_timestamp(s: &str, id: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidRow {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Inserts or replaces the job stored for `job.url`.
fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, url, status, result_text, error_message, model_identifier,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(url) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                result_text = excluded.result_text,
                error_message = excluded.error_message,
                model_identifier = excluded.model_identifier,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                job.id,
                job.url,
                job.status,
                job.result_text,
                job.error_message,
                job.model_identifier,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

fn find_one(db: &Database, sql: &str, key: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params![key], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

fn find_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY updated_at ASC")?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// [`JobRepository`] backed by a SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobRepository for SqliteJobRepository {
    fn save(&self, job: &JobRecord) -> Result<(), RepositoryError> {
        upsert(&self.db, &JobRow::from_record(job))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, RepositoryError> {
        let row = find_one(&self.db, "SELECT * FROM jobs WHERE id = ?1", id)?;
        Ok(row.map(JobRow::into_record).transpose()?)
    }

    fn get_by_url(&self, url: &str) -> Result<Option<JobRecord>, RepositoryError> {
        let row = find_one(&self.db, "SELECT * FROM jobs WHERE url = ?1", url)?;
        Ok(row.map(JobRow::into_record).transpose()?)
    }

    fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, RepositoryError> {
        let jobs = find_by_status(&self.db, status.as_str())?
            .into_iter()
            .map(JobRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}
