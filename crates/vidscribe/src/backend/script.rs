//! Backend that shells out to a transcription script.
//!
//! The script is invoked as
//! `<interpreter> <script> --url <url> --model <model> --chunk_length <n> [--key value ...]`
//! and must print a single JSON object on stdout.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{BackendOutput, TranscribeOptions, TranscriptionBackend};
use crate::error::BackendError;
use crate::executor::ExecutionContext;

#[derive(Debug, Deserialize)]
struct ScriptResult {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "model")]
    model_name: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptBackend {
    interpreter: PathBuf,
    script: PathBuf,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ScriptBackend {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn build_args(&self, url: &str, options: &TranscribeOptions) -> Vec<String> {
        let mut args = vec![
            self.script.to_string_lossy().to_string(),
            "--url".to_string(),
            url.to_string(),
            "--model".to_string(),
            options.model.clone(),
            "--chunk_length".to_string(),
            options.chunk_length_secs.to_string(),
        ];
        for (key, value) in &options.extra {
            if !value.is_empty() {
                args.push(format!("--{}", key));
                args.push(value.clone());
            }
        }
        args
    }
}

fn parse_output(stdout: &[u8]) -> Result<BackendOutput, BackendError> {
    let raw = String::from_utf8_lossy(stdout);
    let result: ScriptResult = serde_json::from_str(raw.trim()).map_err(|e| {
        BackendError::new(format!("invalid JSON output: {}", e), raw.to_string())
    })?;

    if let Some(error) = result.error.filter(|e| !e.trim().is_empty()) {
        return Err(BackendError::new("script reported an error", error));
    }

    Ok(BackendOutput {
        text: result.text,
        model: result.model_name,
    })
}

#[async_trait]
impl TranscriptionBackend for ScriptBackend {
    async fn transcribe(
        &self,
        ctx: &ExecutionContext,
        url: &str,
        options: &TranscribeOptions,
    ) -> Result<BackendOutput, BackendError> {
        ctx.check()
            .map_err(|e| BackendError::new(e.to_string(), String::new()))?;

        let args = self.build_args(url, options);
        log::debug!(
            "Executing {} {}",
            self.interpreter.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let output = cmd.output().await.map_err(|e| {
            BackendError::new(
                format!("failed to start {}: {}", self.interpreter.display(), e),
                String::new(),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            log::error!("Transcription script failed ({}): {}", output.status, stderr.trim());
            return Err(BackendError::new(
                format!("script exited with {}", output.status),
                stderr,
            ));
        }

        parse_output(&output.stdout)
    }
}
