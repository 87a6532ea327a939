pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config, PROGRESS_CAP};
pub use schema::{
    EngineConfig, MonitorConfig, ProcessingConfig, ProgressConfig, QueueConfig, RetryConfig,
    StageBoundary,
};
