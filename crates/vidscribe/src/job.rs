//! Job record and its status state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Lifecycle status of a transcription job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns true for statuses that end a submission.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Terminal states only lead back to `pending` (a fresh resubmission).
    /// `pending -> failed` covers admission failures before any worker ran.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Pending | Processing | Failed | Cancelled) => true,
            (Processing, Pending | Completed | Failed | Cancelled) => true,
            (Completed | Failed | Cancelled, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one transcription request, keyed by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model_identifier: String,
}

impl JobRecord {
    /// Creates a fresh `pending` record with a new id.
    pub fn new(url: &str, model_identifier: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            status: JobStatus::Pending,
            result_text: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            model_identifier: model_identifier.to_string(),
        }
    }

    /// Time since the last state transition.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// A `processing` job whose last update is older than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match Duration::from_std(timeout) {
            Ok(timeout) => self.age(now) > timeout,
            Err(_) => false,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidState {
                from: self.status,
                to: next,
                reason: "transition not allowed".to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Resets the record for a fresh attempt, clearing previous output.
    pub fn reset_to_pending(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.result_text = None;
        self.error_message = None;
        Ok(())
    }

    pub fn mark_processing(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, text: &str, model_used: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidState {
                from: self.status,
                to: JobStatus::Completed,
                reason: "completed jobs require a non-empty transcript".to_string(),
            });
        }
        self.transition(JobStatus::Completed)?;
        self.result_text = Some(text.to_string());
        self.error_message = None;
        if !model_used.is_empty() {
            self.model_identifier = model_used.to_string();
        }
        Ok(())
    }

    pub fn fail(&mut self, message: &str) -> Result<()> {
        self.finish_with_error(JobStatus::Failed, message)
    }

    pub fn cancel(&mut self, message: &str) -> Result<()> {
        self.finish_with_error(JobStatus::Cancelled, message)
    }

    fn finish_with_error(&mut self, status: JobStatus, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(EngineError::InvalidState {
                from: self.status,
                to: status,
                reason: "an error message is required".to_string(),
            });
        }
        self.transition(status)?;
        self.result_text = None;
        self.error_message = Some(message.to_string());
        Ok(())
    }

    /// Checks the text/error invariants that must hold after every transition.
    pub fn invariants_hold(&self) -> bool {
        let has_text = self
            .result_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let has_error = self
            .error_message
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());

        let text_ok = has_text == (self.status == JobStatus::Completed);
        let error_ok = match self.status {
            JobStatus::Failed | JobStatus::Cancelled => has_error,
            _ => true,
        };
        text_ok && error_ok
    }
}
