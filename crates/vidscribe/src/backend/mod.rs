//! Transcription backend seam.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::executor::ExecutionContext;

pub mod fallback;
pub mod script;

pub use fallback::FallbackBackend;
pub use script::ScriptBackend;

/// Per-call settings handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeOptions {
    pub model: String,
    pub chunk_length_secs: u64,
    /// Backend-specific extras, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl TranscribeOptions {
    pub fn new(model: impl Into<String>, chunk_length_secs: u64) -> Self {
        Self {
            model: model.into(),
            chunk_length_secs,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Successful backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub text: String,
    /// Model that actually produced the text. Empty means "as requested".
    pub model: String,
}

/// A fallible, cancellable and potentially slow transcription call.
///
/// Implementations should stop work when the future is dropped; the
/// executor drops it as soon as the context is cancelled.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(
        &self,
        ctx: &ExecutionContext,
        url: &str,
        options: &TranscribeOptions,
    ) -> Result<BackendOutput, BackendError>;
}
