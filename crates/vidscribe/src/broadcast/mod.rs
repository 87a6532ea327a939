//! Broadcasting of job progress to subscribers.
//!
//! The estimator in [`crate::progress`] stays pure; this module only moves its
//! output to whoever listens.

pub mod job_progress;
pub mod ticker;

pub use job_progress::{JobProgressBroadcaster, NoopProgress, ProgressSink, ProgressUpdate};
pub use ticker::{publish_running, LivenessCheck, ProgressTicker};
