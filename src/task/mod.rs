// Asynchronous task model and worker pool

mod executor;
mod task;

pub use executor::{ExecutionContext, TaskExecutor};
pub use task::{Task, TaskContext, TaskError, TaskState, TaskTag};
