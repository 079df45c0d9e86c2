/// The terminating outcome of a task body that did not return a value.
///
/// Task executors return `Result<Value, TaskError>`; the dispatcher inspects
/// the variant to decide what to record and whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The body tried to acquire a lock that is already held. No result is
    /// recorded, but the retry policy still applies.
    #[error("unable to acquire lock: {0}")]
    Locked(String),

    /// The body requested a retry. Forces at least one retry even when the
    /// task's retry budget is exhausted.
    #[error("task requested retry")]
    Retry,

    /// The consumer is shutting down and the body did not finish. Nothing is
    /// recorded and no retry is scheduled.
    #[error("execution interrupted, task did not finish")]
    Interrupted,

    /// Any other failure from the task body.
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failure(message: impl Into<String>) -> Self {
        TaskError::Failure(anyhow::anyhow!(message.into()))
    }

    /// The full error chain, used when recording a failure.
    pub fn chain_text(&self) -> String {
        match self {
            TaskError::Failure(err) => format!("{err:?}"),
            other => other.to_string(),
        }
    }
}

/// Outcome of a pre-execute hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Suppress execution of the task body. The task is dropped silently
    /// apart from a `Canceled` signal.
    #[error("execution canceled by hook")]
    Cancel,

    /// Any other hook failure; logged and swallowed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
