use anyhow::{Context, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Task, TaskContext, TaskTag};
use crate::config::ExecutorConfig;

/// Shared worker pool executing tasks in parallel.
///
/// Task bodies are synchronous and may block (on other tasks, on config
/// resolution), so each runs on the runtime's blocking pool. Submissions
/// beyond `max_blocking_threads` queue as PENDING.
pub struct TaskExecutor {
    /// Owned runtime; `None` when running on a borrowed handle
    runtime: Option<Runtime>,
    handle: Handle,
    /// Submitted tasks that have not ended
    in_flight: Arc<DashMap<Uuid, Task>>,
    submitted: AtomicU64,
}

impl TaskExecutor {
    /// Build an executor with its own multi-threaded runtime
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .context("Failed to build task runtime")?;

        info!(
            worker_threads = config.worker_threads,
            max_blocking_threads = config.max_blocking_threads,
            "Task executor started"
        );

        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            in_flight: Arc::new(DashMap::new()),
            submitted: AtomicU64::new(0),
        })
    }

    /// Run tasks on an existing runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            in_flight: Arc::new(DashMap::new()),
            submitted: AtomicU64::new(0),
        }
    }

    /// Submit a task for execution and return its handle.
    ///
    /// Submitting a task that was already submitted (here or elsewhere) is a
    /// no-op returning the same handle.
    pub fn submit(&self, task: Task) -> Task {
        if !task.mark_submitted() {
            return task;
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(task.id(), task.clone());
        debug!(task_id = %task.id(), name = %task.display_name(), "Task submitted");

        let in_flight = Arc::clone(&self.in_flight);
        let running = task.clone();
        // The JoinHandle is not needed: completion is observed through the task
        drop(self.handle.spawn_blocking(move || {
            running.run();
            in_flight.remove(&running.id());
        }));

        task
    }

    /// Create and submit a task from a closure
    pub fn submit_fn<F>(&self, display_name: impl Into<String>, tags: Vec<TaskTag>, job: F) -> Task
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<Value> + Send + 'static,
    {
        let task = Task::new(display_name, job);
        for tag in tags {
            task.add_tag(tag);
        }
        self.submit(task)
    }

    /// Submitted tasks carrying `tag` that have not ended
    pub fn tasks_with_tag(&self, tag: &TaskTag) -> Vec<Task> {
        self.in_flight
            .iter()
            .filter(|e| e.value().has_tag(tag))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Total tasks ever submitted to this executor
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Safe from any thread, including a task thread of this runtime
            runtime.shutdown_background();
        }
    }
}

/// Per-entity view of the executor: every task submitted through it is tagged
/// with the owning entity.
#[derive(Clone)]
pub struct ExecutionContext {
    executor: Arc<TaskExecutor>,
    tags: Vec<TaskTag>,
}

impl ExecutionContext {
    pub fn new(executor: Arc<TaskExecutor>, tags: Vec<TaskTag>) -> Self {
        Self { executor, tags }
    }

    pub fn tags(&self) -> &[TaskTag] {
        &self.tags
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Tag and submit. Tags are only added if the task is still unsubmitted.
    pub fn submit(&self, task: Task) -> Task {
        for tag in &self.tags {
            task.add_tag(tag.clone());
        }
        self.executor.submit(task)
    }

    pub fn submit_fn<F>(&self, display_name: impl Into<String>, job: F) -> Task
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<Value> + Send + 'static,
    {
        self.submit(Task::new(display_name, job))
    }
}
