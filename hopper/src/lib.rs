//! hopper is a broker-backed task queue: producers enqueue invocations of
//! registered tasks, consumer processes pull them off a shared broker and
//! execute them, with delayed scheduling, retries, revocation, chained
//! continuations, periodic dispatch and a result store layered on top.
//!
//! ```no_run
//! use hopper::{Config, GetOptions, Hopper, TaskOptions, task_fn};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), hopper::HopperError> {
//! let queue = Hopper::new(Config::new("my-app").immediate())?;
//! let add = queue.task(
//!     "add",
//!     TaskOptions::default(),
//!     task_fn(|args, _kwargs, _ctx| async move {
//!         let (a, b) = (args[0].as_i64().unwrap(), args[1].as_i64().unwrap());
//!         Ok(json!(a + b))
//!     }),
//! )?;
//!
//! let result = add.call(vec![json!(2), json!(3)], Default::default()).await?;
//! assert_eq!(
//!     result.unwrap().get(&GetOptions::default()).await?,
//!     Some(json!(5))
//! );
//! # Ok(())
//! # }
//! ```

mod consumer;
mod dispatch;
mod error;
mod executor;
mod handle;
mod lock;
mod registry;
mod result;
mod schedule;
mod signal;
mod task;

pub use hopper_lib::{HookError, Serializer, SerializerError, TaskError};
pub use hopper_storage::{BlackHoleStorage, MemoryStorage, Storage, StorageError};
#[cfg(feature = "redis-db")]
pub use hopper_storage::{RedisStorage, RedisStorageConfig};
#[cfg(feature = "sqlite")]
pub use hopper_storage::{SqliteStorage, SqliteStorageConfig};

pub use consumer::{Consumer, ConsumerOptions};
pub use dispatch::{Config, EnqueueResult, Hopper, StorageConfig};
pub use error::HopperError;
pub use executor::{task_fn, FnExecutor, TaskContext, TaskExecutor};
pub use handle::{ScheduleAt, TaskHandle, TaskOptions};
pub use lock::TaskLock;
pub use registry::{RegisteredTask, Registry};
pub use result::{ErrorRecord, GetOptions, ResultGroup, ResultHandle, StoredResult};
pub use schedule::{Crontab, EveryBetween, Schedule, ScheduleError};
pub use signal::Signal;
pub use task::{Task, TaskMessage};
