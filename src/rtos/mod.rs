//! Cooperative run-to-completion scheduling

pub mod scheduler;
pub mod task;
pub mod tick;

pub use scheduler::{ConfigError, Scheduler};
pub use task::{Runnable, Task, TaskConfig, TaskContext, TaskId, TaskState};
pub use tick::{CountDownTick, ExternalTick, TickSource};
