use std::future::Future;

use hopper_lib::TaskError;
use tracing::warn;

use crate::dispatch::Hopper;

/// Named mutual exclusion over the broker's key/value store.
///
/// Acquisition is `put_if_empty` on a key scoped to the queue name, so it
/// excludes across processes sharing the broker. Prefer [`TaskLock::run`],
/// which releases on every exit path.
#[derive(Clone)]
pub struct TaskLock {
    hopper: Hopper,
    name: String,
    key: String,
}

impl TaskLock {
    pub(crate) fn new(hopper: Hopper, name: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("{}.lock.{}", hopper.name(), name);
        hopper.track_lock_key(&key);
        Self { hopper, name, key }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn acquire(&self) -> Result<(), TaskError> {
        let acquired = self
            .hopper
            .put_if_empty(&self.key, &"1")
            .await
            .map_err(|e| TaskError::Failure(anyhow::anyhow!(e)))?;
        if !acquired {
            return Err(TaskError::Locked(self.name.clone()));
        }
        Ok(())
    }

    pub async fn release(&self) -> Result<(), TaskError> {
        self.hopper
            .get_raw(&self.key, false)
            .await
            .map_err(|e| TaskError::Failure(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Run `body` while holding the lock. The lock is released whether the
    /// body succeeds or fails; a failed acquisition surfaces as
    /// [`TaskError::Locked`] without running the body.
    pub async fn run<F, Fut, T>(&self, body: F) -> Result<T, TaskError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.acquire().await?;
        let outcome = body().await;
        if let Err(release_err) = self.release().await {
            warn!("failed to release lock {}: {release_err}", self.name);
        }
        outcome
    }
}
