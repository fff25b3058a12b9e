use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entity::EntityId;

type Job = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<Value> + Send>;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Metadata attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskTag {
    /// Task executes on behalf of this entity
    Entity(EntityId),
    /// Task runs this effector
    Effector(String),
    Named(String),
}

/// Terminal failure observed by anyone waiting on a task
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(Arc<anyhow::Error>),
    #[error("task cancelled")]
    Cancelled,
}

struct Status {
    state: TaskState,
    outcome: Option<Result<Value, TaskError>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

struct TaskInner {
    id: Uuid,
    display_name: String,
    tags: RwLock<Vec<TaskTag>>,
    created_at: DateTime<Utc>,
    status: Mutex<Status>,
    done: Condvar,
    cancel_requested: AtomicBool,
    submitted: AtomicBool,
    job: Mutex<Option<Job>>,
}

/// Handle to an asynchronous unit of work. Clones share the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create an unsubmitted task. It stays PENDING until handed to an executor.
    pub fn new<F>(display_name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<Value> + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                id: Uuid::now_v7(),
                display_name: display_name.into(),
                tags: RwLock::new(Vec::new()),
                created_at: Utc::now(),
                status: Mutex::new(Status {
                    state: TaskState::Pending,
                    outcome: None,
                    started_at: None,
                    ended_at: None,
                }),
                done: Condvar::new(),
                cancel_requested: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                job: Mutex::new(Some(Box::new(job))),
            }),
        }
    }

    pub fn with_tag(self, tag: TaskTag) -> Self {
        self.add_tag(tag);
        self
    }

    /// Add a tag if the task has not been submitted yet. Returns whether it was added.
    pub fn add_tag(&self, tag: TaskTag) -> bool {
        if self.is_submitted() {
            return false;
        }
        let mut tags = self.inner.tags.write();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        true
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn tags(&self) -> Vec<TaskTag> {
        self.inner.tags.read().clone()
    }

    pub fn has_tag(&self, tag: &TaskTag) -> bool {
        self.inner.tags.read().contains(tag)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.status.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.status.lock().ended_at
    }

    pub fn state(&self) -> TaskState {
        self.inner.status.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.submitted.load(Ordering::SeqCst)
    }

    /// Claim the task for an executor. Only the first caller gets `true`.
    pub(crate) fn mark_submitted(&self) -> bool {
        !self.inner.submitted.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Cancel the task.
    ///
    /// A PENDING task becomes CANCELLED immediately and never runs. A RUNNING
    /// task only gets its cancellation flag set; the body observes it through
    /// [`TaskContext::is_cancelled`]. Returns false if the task already ended.
    pub fn cancel(&self) -> bool {
        let mut status = self.inner.status.lock();
        let state = status.state;
        match state {
            TaskState::Pending => {
                self.inner.cancel_requested.store(true, Ordering::SeqCst);
                status.state = TaskState::Cancelled;
                status.outcome = Some(Err(TaskError::Cancelled));
                status.ended_at = Some(Utc::now());
                self.inner.done.notify_all();
                drop(status);
                let job = self.inner.job.lock().take();
                drop(job);
                debug!(task_id = %self.id(), name = %self.display_name(), "Task cancelled before start");
                true
            }
            TaskState::Running => {
                self.inner.cancel_requested.store(true, Ordering::SeqCst);
                debug!(task_id = %self.id(), name = %self.display_name(), "Cancellation requested for running task");
                true
            }
            _ => false,
        }
    }

    /// Block until the task ends and return its result, failure or cancellation.
    ///
    /// There is no timeout: waiting on a task that is never submitted, or that
    /// queues behind the caller on a saturated pool, blocks indefinitely.
    pub fn get(&self) -> Result<Value, TaskError> {
        let mut status = self.inner.status.lock();
        loop {
            if let Some(outcome) = &status.outcome {
                return outcome.clone();
            }
            self.inner.done.wait(&mut status);
        }
    }

    /// Like [`Task::get`] but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, TaskError>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut status = self.inner.status.lock();
        loop {
            if let Some(outcome) = &status.outcome {
                return Some(outcome.clone());
            }
            if self
                .inner
                .done
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return status.outcome.clone();
            }
        }
    }

    /// Run the body on the current thread. Called by the executor.
    pub(crate) fn run(&self) {
        let job = {
            let mut status = self.inner.status.lock();
            if status.state != TaskState::Pending {
                return;
            }
            status.state = TaskState::Running;
            status.started_at = Some(Utc::now());
            self.inner.job.lock().take()
        };

        let Some(job) = job else {
            self.finish(Err(anyhow::anyhow!("task body already consumed")));
            return;
        };

        let ctx = TaskContext { task: self.clone() };
        let result = match catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "task panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        self.finish(result);
    }

    fn finish(&self, result: anyhow::Result<Value>) {
        let mut status = self.inner.status.lock();
        let (state, outcome) = match result {
            Ok(value) => (TaskState::Completed, Ok(value)),
            Err(_) if self.is_cancel_requested() => (TaskState::Cancelled, Err(TaskError::Cancelled)),
            Err(e) => {
                warn!(task_id = %self.id(), name = %self.display_name(), error = %e, "Task failed");
                (TaskState::Failed, Err(TaskError::Failed(Arc::new(e))))
            }
        };
        status.state = state;
        status.outcome = Some(outcome);
        status.ended_at = Some(Utc::now());
        self.inner.done.notify_all();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// View of the running task handed to its body
pub struct TaskContext {
    task: Task,
}

impl TaskContext {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn has_tag(&self, tag: &TaskTag) -> bool {
        self.task.has_tag(tag)
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancel_requested()
    }

    /// Fail with [`TaskError::Cancelled`] once cancellation has been requested.
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(TaskError::Cancelled.into());
        }
        Ok(())
    }
}
