//! Process-wide log setup for binaries and tests embedding the engine.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::ConfigError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_directive` when `RUST_LOG` is unset, and forwards `log` records
/// into it.
///
/// Returns `Ok(false)` if logging was already set up by an earlier call.
pub fn init_logging(default_directive: &str) -> Result<bool, ConfigError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| ConfigError::Logging(format!("bad filter '{}': {}", default_directive, e)))?,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    log::debug!("Logging initialized");
    Ok(true)
}
