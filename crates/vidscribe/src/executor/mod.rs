//! Bounded retries with exponential backoff around one backend call.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::backend::{BackendOutput, TranscribeOptions, TranscriptionBackend};
use crate::config::RetryConfig;
use crate::error::{BackendError, EngineError, Result};

pub mod context;

pub use context::ExecutionContext;

/// Longest diagnostic excerpt written to the log per failed attempt.
const SNIPPET_CHARS: usize = 200;

/// Delay before attempt `attempt + 1`, without jitter.
///
/// `attempt` is 1-based: the delay after the first failure is `initial`.
pub fn base_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let initial = config.initial_backoff().as_secs_f64();
    let max = config.max_backoff().as_secs_f64();
    let secs = (initial * config.backoff_factor.powi(exponent)).min(max);
    if secs.is_finite() {
        Duration::from_secs_f64(secs.max(0.0))
    } else {
        config.max_backoff()
    }
}

/// `base_delay` plus uniform jitter in `[0, base / 2)`.
fn jittered_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = base_delay(config, attempt);
    let half = base / 2;
    if half.is_zero() {
        return base;
    }
    base + rand::thread_rng().gen_range(Duration::ZERO..half)
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

pub struct RetryingExecutor {
    backend: Arc<dyn TranscriptionBackend>,
    config: RetryConfig,
}

impl RetryingExecutor {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, config: RetryConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calls the backend until it succeeds, attempts run out, or `ctx` is done.
    ///
    /// A cancelled or expired context ends the loop at once with
    /// `EngineError::Cancelled`. An empty transcript counts as a failed attempt.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        url: &str,
        options: &TranscribeOptions,
    ) -> Result<BackendOutput> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = BackendError::new("no attempt was made", String::new());

        for attempt in 1..=max_attempts {
            ctx.check()?;

            let outcome = tokio::select! {
                biased;
                cause = ctx.done() => return Err(EngineError::Cancelled(cause)),
                res = self.backend.transcribe(ctx, url, options) => res,
            };

            match outcome {
                Ok(output) if !output.text.trim().is_empty() => {
                    if attempt > 1 {
                        log::info!("Transcription of {} succeeded on attempt {}", url, attempt);
                    }
                    return Ok(output);
                }
                Ok(_) => {
                    last_error = BackendError::new("backend returned an empty transcript", "");
                }
                Err(e) => last_error = e,
            }

            log::warn!(
                "Attempt {}/{} for {} failed: {} [{}]",
                attempt,
                max_attempts,
                url,
                last_error.message,
                snippet(&last_error.diagnostic)
            );

            if attempt < max_attempts {
                let delay = jittered_delay(&self.config, attempt);
                log::debug!("Retrying {} in {:?}", url, delay);
                tokio::select! {
                    biased;
                    cause = ctx.done() => return Err(EngineError::Cancelled(cause)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(EngineError::ExecutionFailed {
            attempts: max_attempts,
            message: last_error.message,
            diagnostic: last_error.diagnostic,
        })
    }
}
