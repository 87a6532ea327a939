//! Scripted transcription backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use vidscribe::backend::{BackendOutput, TranscribeOptions, TranscriptionBackend};
use vidscribe::{BackendError, ExecutionContext};

/// One scripted backend reaction.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this transcript.
    Succeed(String),
    /// Return this transcript after a delay.
    SucceedAfter(Duration, String),
    /// Fail with this diagnostic.
    Fail(String),
    /// Never return on its own.
    Hang,
}

/// Plays `steps` in order, then repeats `fallback` forever.
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with `text`.
    pub fn succeeding(text: &str) -> Self {
        Self::new(vec![], Step::Succeed(text.to_string()))
    }

    /// Always fails with `diagnostic`.
    pub fn failing(diagnostic: &str) -> Self {
        Self::new(vec![], Step::Fail(diagnostic.to_string()))
    }

    pub fn hanging() -> Self {
        Self::new(vec![], Step::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedBackend {
    async fn transcribe(
        &self,
        _ctx: &ExecutionContext,
        url: &str,
        _options: &TranscribeOptions,
    ) -> Result<BackendOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match self.next_step() {
            Step::Succeed(text) => Ok(BackendOutput {
                text,
                model: "tiny.en".to_string(),
            }),
            Step::SucceedAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(BackendOutput {
                    text,
                    model: "tiny.en".to_string(),
                })
            }
            Step::Fail(diagnostic) => Err(BackendError::new("exit status 1", diagnostic)),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::new("hang step woke up", ""))
            }
        }
    }
}
