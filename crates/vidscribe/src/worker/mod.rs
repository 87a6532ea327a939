pub mod pool;
pub mod runner;
pub mod task;

pub use pool::{JobQueue, OverdueTask, QueueStats, TaskProcessor, TaskStatus};
pub use runner::JobRunner;
pub use task::{Priority, QueuedTask, TaskHandle, TaskOutcome};
