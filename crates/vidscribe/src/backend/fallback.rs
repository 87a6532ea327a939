//! Two-tier backend: try a cheap source first, transcribe only when it has nothing.
//!
//! The usual pairing is a captions fetcher as primary and a speech model as
//! secondary. The winning tier is recorded in [`BackendOutput::model`] as
//! `<label>:<model>`, which ends up in the job's `model_identifier`.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BackendOutput, TranscribeOptions, TranscriptionBackend};
use crate::error::BackendError;
use crate::executor::ExecutionContext;

struct Tier {
    label: String,
    backend: Arc<dyn TranscriptionBackend>,
}

pub struct FallbackBackend {
    primary: Tier,
    secondary: Tier,
}

impl FallbackBackend {
    pub fn new(
        primary_label: impl Into<String>,
        primary: Arc<dyn TranscriptionBackend>,
        secondary_label: impl Into<String>,
        secondary: Arc<dyn TranscriptionBackend>,
    ) -> Self {
        Self {
            primary: Tier {
                label: primary_label.into(),
                backend: primary,
            },
            secondary: Tier {
                label: secondary_label.into(),
                backend: secondary,
            },
        }
    }
}

fn tagged(tier: &Tier, output: BackendOutput, options: &TranscribeOptions) -> BackendOutput {
    let model = if output.model.is_empty() {
        &options.model
    } else {
        &output.model
    };
    BackendOutput {
        model: format!("{}:{}", tier.label, model),
        text: output.text,
    }
}

#[async_trait]
impl TranscriptionBackend for FallbackBackend {
    async fn transcribe(
        &self,
        ctx: &ExecutionContext,
        url: &str,
        options: &TranscribeOptions,
    ) -> Result<BackendOutput, BackendError> {
        match self.primary.backend.transcribe(ctx, url, options).await {
            Ok(output) if !output.text.trim().is_empty() => {
                return Ok(tagged(&self.primary, output, options));
            }
            Ok(_) => {
                log::info!(
                    "{} returned no text for {}, falling back to {}",
                    self.primary.label,
                    url,
                    self.secondary.label
                );
            }
            Err(e) => {
                // A cancelled call must not spend a second backend run.
                if ctx.is_cancelled() {
                    return Err(e);
                }
                log::warn!(
                    "{} failed for {} ({}), falling back to {}",
                    self.primary.label,
                    url,
                    e,
                    self.secondary.label
                );
            }
        }

        let output = self
            .secondary
            .backend
            .transcribe(ctx, url, options)
            .await
            .map_err(|e| {
                BackendError::new(
                    format!("{}: {}", self.secondary.label, e.message),
                    e.diagnostic,
                )
            })?;
        Ok(tagged(&self.secondary, output, options))
    }
}
