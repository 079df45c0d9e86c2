use std::future::Future;

use chrono::{DateTime, Utc};
use hopper_lib::TaskError;
use serde_json::{Map, Value};

use crate::task::Task;

/// Execution-time view of the task being run, handed to every executor.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: String,
    pub name: String,
    pub retries: u32,
    pub eta: Option<DateTime<Utc>>,
}

impl TaskContext {
    pub(crate) fn for_task(task: &Task) -> Self {
        Self {
            id: task.id().to_string(),
            name: task.name.clone(),
            retries: task.retries,
            eta: task.eta,
        }
    }
}

/// The unit of work behind a registered task name.
///
/// The returned value is recorded in the result store (when results are
/// enabled) and fed into any `on_complete` continuation.
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        ctx: TaskContext,
    ) -> Result<Value, TaskError>;
}

/// Adapter registering a plain async closure as a [`TaskExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap an async closure so it can be registered as a task body.
pub fn task_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(Vec<Value>, Map<String, Value>, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    FnExecutor { f }
}

#[async_trait::async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Vec<Value>, Map<String, Value>, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn execute(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        ctx: TaskContext,
    ) -> Result<Value, TaskError> {
        (self.f)(args, kwargs, ctx).await
    }
}
