pub mod backend;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod job;
pub mod locks;
pub mod logging;
pub mod monitor;
pub mod periodic;
pub mod progress;
pub mod repository;
pub mod service;
pub mod worker;

pub use backend::{
    BackendOutput, FallbackBackend, ScriptBackend, TranscribeOptions, TranscriptionBackend,
};
pub use broadcast::{
    JobProgressBroadcaster, NoopProgress, ProgressSink, ProgressTicker, ProgressUpdate,
};
pub use config::{load_config, load_config_from_str, EngineConfig};
pub use db::{Database, SqliteJobRepository};
pub use error::{BackendError, CancelCause, ConfigError, EngineError, RepositoryError, Result};
pub use executor::{ExecutionContext, RetryingExecutor};
pub use job::{JobRecord, JobStatus};
pub use locks::{RecordLock, ResourceGuard, ResourceLocks};
pub use logging::init_logging;
pub use monitor::{StaleMonitor, Staleness, SweepReport};
pub use progress::{estimate, ProgressEstimate, ProgressStage};
pub use repository::{JobRepository, MemoryJobRepository};
pub use service::{decide, Disposition, TranscriptionService};
pub use worker::{OverdueTask, Priority, QueueStats, TaskHandle, TaskOutcome, TaskStatus};
