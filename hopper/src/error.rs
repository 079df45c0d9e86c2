use hopper_lib::{SerializerError, TaskError};
use hopper_storage::StorageError;

use crate::result::ErrorRecord;
use crate::schedule::ScheduleError;

/// The standardized error returned by the hopper dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HopperError {
    /// Misuse at construction time: duplicate task names, bad chain depth,
    /// invalid options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A message referenced a task name that is not registered in this
    /// process. The consumer logs and drops the message.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serializer error: {0}")]
    Serializer(#[from] SerializerError),

    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// Blocking `get` exhausted its timeout before a result appeared.
    #[error("timed out waiting for task result")]
    ResultTimeout,

    /// The stored record for a task is an error record; carries the
    /// recorded metadata.
    #[error("task failed: {}", .0.error)]
    TaskFailed(ErrorRecord),

    /// A task body failure surfaced through a local call path.
    #[error(transparent)]
    Task(#[from] TaskError),
}
