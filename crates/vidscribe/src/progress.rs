//! Heuristic progress estimation for transcription jobs.
//!
//! The estimate is a pure function of status, creation time and the current
//! time. It never measures anything; it only gives subscribers something to
//! show while a job runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ProgressConfig, PROGRESS_CAP};
use crate::job::JobStatus;

/// Minimum remaining-time estimate reported for a running job.
const MIN_ETA_SECS: u64 = 10;

/// Named stage shown to subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Queued,
    Preparing,
    Downloading,
    ExtractingAudio,
    Analyzing,
    Transcribing,
    Finalizing,
    Complete,
    Failed,
    Cancelled,
}

impl ProgressStage {
    /// Human-readable description of the stage.
    pub fn message(&self) -> &'static str {
        match self {
            ProgressStage::Queued => "Waiting for a free worker",
            ProgressStage::Preparing => "Preparing download",
            ProgressStage::Downloading => "Downloading video",
            ProgressStage::ExtractingAudio => "Extracting audio",
            ProgressStage::Analyzing => "Analyzing audio",
            ProgressStage::Transcribing => "Transcribing audio",
            ProgressStage::Finalizing => "Finalizing transcription",
            ProgressStage::Complete => "Transcription complete",
            ProgressStage::Failed => "Transcription failed",
            ProgressStage::Cancelled => "Transcription cancelled",
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProgressStage::Queued => "queued",
            ProgressStage::Preparing => "preparing",
            ProgressStage::Downloading => "downloading",
            ProgressStage::ExtractingAudio => "extracting_audio",
            ProgressStage::Analyzing => "analyzing",
            ProgressStage::Transcribing => "transcribing",
            ProgressStage::Finalizing => "finalizing",
            ProgressStage::Complete => "complete",
            ProgressStage::Failed => "failed",
            ProgressStage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEstimate {
    /// Fraction in `[0, 1]`; only terminal jobs report `1.0`.
    pub progress: f64,
    pub stage: ProgressStage,
    pub message: String,
    pub estimated_seconds_remaining: u64,
}

impl ProgressEstimate {
    fn new(progress: f64, stage: ProgressStage, eta: u64) -> Self {
        Self {
            progress,
            stage,
            message: stage.message().to_string(),
            estimated_seconds_remaining: eta,
        }
    }
}

/// Estimates progress for a job in `status` created at `created_at`.
pub fn estimate(
    status: JobStatus,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &ProgressConfig,
) -> ProgressEstimate {
    match status {
        JobStatus::Completed => ProgressEstimate::new(1.0, ProgressStage::Complete, 0),
        JobStatus::Failed => ProgressEstimate::new(1.0, ProgressStage::Failed, 0),
        JobStatus::Cancelled => ProgressEstimate::new(1.0, ProgressStage::Cancelled, 0),
        JobStatus::Pending => {
            ProgressEstimate::new(0.0, ProgressStage::Queued, config.total_estimate_secs)
        }
        JobStatus::Processing => {
            // Clock skew can put created_at in the future; treat as just started.
            let elapsed_ms = (now - created_at).num_milliseconds().max(0);
            let elapsed = elapsed_ms as f64 / 1000.0;
            let (progress, stage) = interpolate(elapsed, config);
            let remaining = config
                .total_estimate_secs
                .saturating_sub(elapsed as u64)
                .max(MIN_ETA_SECS);
            ProgressEstimate::new(progress, stage, remaining)
        }
    }
}

fn interpolate(elapsed_secs: f64, config: &ProgressConfig) -> (f64, ProgressStage) {
    let mut start_secs = 0.0;
    let mut start_fraction = 0.0;

    for boundary in &config.stages {
        let end_secs = boundary.ends_at_secs as f64;
        if elapsed_secs < end_secs {
            let span = end_secs - start_secs;
            let ratio = if span > 0.0 {
                (elapsed_secs - start_secs) / span
            } else {
                1.0
            };
            let fraction = start_fraction + ratio * (boundary.ends_at_fraction - start_fraction);
            return (fraction.clamp(0.0, PROGRESS_CAP), boundary.stage);
        }
        start_secs = end_secs;
        start_fraction = boundary.ends_at_fraction;
    }

    let stage = config
        .stages
        .last()
        .map(|b| b.stage)
        .unwrap_or(ProgressStage::Finalizing);
    (start_fraction.clamp(0.0, PROGRESS_CAP), stage)
}
