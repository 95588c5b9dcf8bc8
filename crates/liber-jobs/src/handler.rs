//! Task handler trait and execution context.

use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use liber_core::{Error, Result, Task};

/// Progress callback type for task handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to task handlers.
///
/// Carries the task payload, an optional progress callback, and the soft
/// deadline. Long-running handlers are expected to poll
/// [`TaskContext::soft_limit_exceeded`] between work units and checkpoint
/// when it fires; the hard limit is enforced from outside by the worker.
pub struct TaskContext {
    /// The task being processed.
    pub task: Task,
    soft_deadline: Option<Instant>,
    progress_callback: Option<ProgressCallback>,
}

impl TaskContext {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            soft_deadline: None,
            progress_callback: None,
        }
    }

    /// Set the soft deadline after which the handler should checkpoint.
    pub fn with_soft_deadline(mut self, deadline: Instant) -> Self {
        self.soft_deadline = Some(deadline);
        self
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// Whether the cooperative checkpoint signal has fired.
    pub fn soft_limit_exceeded(&self) -> bool {
        self.soft_deadline
            .map_or(false, |deadline| Instant::now() >= deadline)
    }

    /// The soft deadline, for handlers that check it off the async runtime
    /// (e.g. inside `spawn_blocking` closures).
    pub fn soft_deadline(&self) -> Option<Instant> {
        self.soft_deadline
    }

    /// The task payload.
    pub fn payload(&self) -> &JsonValue {
        &self.task.payload
    }

    /// Deserialize one field of the payload object.
    pub fn arg<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .task
            .payload
            .get(key)
            .ok_or_else(|| Error::InvalidInput(format!("missing task argument: {key}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("bad task argument {key}: {e}")))
    }

    /// Deserialize one field of the payload object, if present.
    pub fn arg_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.task.payload.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::InvalidInput(format!("bad task argument {key}: {e}"))),
        }
    }
}

/// Result of task execution.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Task completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Task failed; the scheduler retries it if retries remain.
    Failed(String),
    /// Task failed deterministically; never retried.
    Terminal(String),
}

impl TaskOutcome {
    /// Classify an error per retryability: deterministic failures become
    /// terminal, everything else is retried until retries run out.
    pub fn from_error(err: &Error) -> Self {
        if err.is_retryable() {
            TaskOutcome::Failed(err.to_string())
        } else {
            TaskOutcome::Terminal(err.to_string())
        }
    }
}

/// Trait for task handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The registered task name this handler processes.
    fn name(&self) -> &str;

    /// Execute the task.
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    name: String,
}

impl NoOpHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl TaskHandler for NoOpHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        ctx.report_progress(100, Some("Done"));
        TaskOutcome::Success(None)
    }
}
