use std::path::Path;

use crate::config::schema::EngineConfig;
use crate::error::ConfigError;

/// Highest progress fraction a non-terminal job may report.
pub const PROGRESS_CAP: f64 = 0.95;

/// Upper bound for every duration setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn require_secs(name: &str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(invalid(format!("{} must be > 0", name)));
    }
    if secs > MAX_DURATION_SECS {
        return Err(invalid(format!(
            "{} must not exceed {}s",
            name, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let queue = &config.queue;
    if queue.worker_count == 0 {
        return Err(invalid("queue.worker_count must be > 0"));
    }
    if queue.queue_capacity == 0 || queue.priority_capacity == 0 {
        return Err(invalid("queue capacities must be > 0"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be >= 1"));
    }
    if !(retry.backoff_factor >= 1.0 && retry.backoff_factor.is_finite()) {
        return Err(invalid("retry.backoff_factor must be a finite number >= 1.0"));
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(invalid(
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
        ));
    }

    let processing = &config.processing;
    require_secs("processing.job_timeout_secs", processing.job_timeout_secs)?;
    require_secs("processing.stale_after_secs", processing.stale_after_secs)?;
    if processing.default_model.trim().is_empty() {
        return Err(invalid("processing.default_model must not be empty"));
    }

    // Stale and hung are separate knobs; hung is the longer alert-only one.
    require_secs("monitor.interval_secs", config.monitor.interval_secs)?;
    require_secs("monitor.hung_after_secs", config.monitor.hung_after_secs)?;
    if config.monitor.hung_after_secs < processing.stale_after_secs {
        return Err(invalid(
            "monitor.hung_after_secs must be >= processing.stale_after_secs",
        ));
    }

    validate_stages(config)
}

fn validate_stages(config: &EngineConfig) -> Result<(), ConfigError> {
    let progress = &config.progress;
    require_secs("progress.total_estimate_secs", progress.total_estimate_secs)?;
    if progress.publish_interval_ms > MAX_DURATION_SECS * 1000 {
        return Err(invalid(format!(
            "progress.publish_interval_ms must not exceed {}ms",
            MAX_DURATION_SECS * 1000
        )));
    }
    if progress.stages.is_empty() {
        return Err(invalid("progress.stages must not be empty"));
    }

    let mut prev_secs = 0;
    let mut prev_fraction = 0.0;
    for boundary in &progress.stages {
        if boundary.ends_at_secs <= prev_secs {
            return Err(invalid(format!(
                "progress stage '{}' must end after {}s",
                boundary.stage, prev_secs
            )));
        }
        if !(boundary.ends_at_fraction > 0.0 && boundary.ends_at_fraction <= PROGRESS_CAP) {
            return Err(invalid(format!(
                "progress stage '{}' fraction must be in (0, {}]",
                boundary.stage, PROGRESS_CAP
            )));
        }
        if boundary.ends_at_fraction < prev_fraction {
            return Err(invalid(format!(
                "progress stage '{}' fraction must not decrease",
                boundary.stage
            )));
        }
        prev_secs = boundary.ends_at_secs;
        prev_fraction = boundary.ends_at_fraction;
    }

    if prev_secs > progress.total_estimate_secs {
        return Err(invalid(
            "last progress stage must end within progress.total_estimate_secs",
        ));
    }

    Ok(())
}
