use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{EnqueueResult, Hopper};
use crate::error::HopperError;
use crate::handle::ScheduleAt;
use crate::task::Task;

/// Metadata recorded in place of a return value when a task fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Display form of the terminating error.
    pub error: String,
    /// Retries remaining when the record was written.
    pub retries: u32,
    /// Full error chain.
    pub traceback: String,
}

/// What the result store holds under a task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredResult {
    Value(Value),
    Error(ErrorRecord),
}

/// Polling behavior for [`ResultHandle::get`].
#[derive(Debug, Clone)]
pub struct GetOptions {
    pub blocking: bool,
    pub timeout: Option<Duration>,
    /// Multiplier applied to the poll delay after each miss.
    pub backoff: f64,
    pub max_delay: Duration,
    /// Revoke the task before raising a timeout error.
    pub revoke_on_timeout: bool,
    /// Peek instead of pop; the stored value survives the read.
    pub preserve: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            blocking: false,
            timeout: None,
            backoff: 1.15,
            max_delay: Duration::from_secs(1),
            revoke_on_timeout: false,
            preserve: false,
        }
    }
}

impl GetOptions {
    pub fn blocking(timeout: Option<Duration>) -> Self {
        Self {
            blocking: true,
            timeout,
            ..Self::default()
        }
    }

    pub fn preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }

    pub fn revoke_on_timeout(mut self, revoke: bool) -> Self {
        self.revoke_on_timeout = revoke;
        self
    }
}

/// Client-side view of one task's eventual result.
///
/// Reading is destructive by default (the record is popped); the fetched
/// record is cached so repeated reads from the same handle keep working.
pub struct ResultHandle {
    hopper: Hopper,
    id: String,
    task: Option<Task>,
    cached: Mutex<Option<StoredResult>>,
}

impl ResultHandle {
    pub(crate) fn new(hopper: Hopper, task: Task) -> Self {
        Self {
            hopper,
            id: task.id().to_string(),
            task: Some(task),
            cached: Mutex::new(None),
        }
    }

    pub(crate) fn from_id(hopper: Hopper, id: impl Into<String>) -> Self {
        Self {
            hopper,
            id: id.into(),
            task: None,
            cached: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, preserve: bool) -> Result<Option<StoredResult>, HopperError> {
        if let Some(cached) = self.cached.lock().unwrap().clone() {
            return Ok(Some(cached));
        }
        let raw = self.hopper.get_raw(&self.id, preserve).await?;
        match raw {
            Some(data) => {
                let stored: StoredResult = self.hopper.serializer().deserialize(&data)?;
                *self.cached.lock().unwrap() = Some(stored.clone());
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Fetch the raw stored record, without unwrapping error records.
    pub async fn get_raw(&self, options: &GetOptions) -> Result<Option<StoredResult>, HopperError> {
        if !options.blocking {
            return self.fetch(options.preserve).await;
        }

        let started = Instant::now();
        let mut delay = Duration::from_millis(100);
        loop {
            if let Some(stored) = self.fetch(options.preserve).await? {
                return Ok(Some(stored));
            }
            if let Some(timeout) = options.timeout {
                if started.elapsed() >= timeout {
                    if options.revoke_on_timeout {
                        self.revoke(true).await?;
                    }
                    return Err(HopperError::ResultTimeout);
                }
            }
            if delay > options.max_delay {
                delay = options.max_delay;
            }
            tokio::time::sleep(delay).await;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * options.backoff);
        }
    }

    /// Fetch the task's return value. A stored error record raises
    /// [`HopperError::TaskFailed`] carrying its metadata.
    pub async fn get(&self, options: &GetOptions) -> Result<Option<Value>, HopperError> {
        match self.get_raw(options).await? {
            Some(StoredResult::Value(value)) => Ok(Some(value)),
            Some(StoredResult::Error(record)) => Err(HopperError::TaskFailed(record)),
            None => Ok(None),
        }
    }

    pub async fn is_revoked(&self) -> Result<bool, HopperError> {
        match &self.task {
            Some(task) => self.hopper.is_revoked(task, None, true).await,
            None => self.hopper.is_revoked_by_id(&self.id, None, true).await,
        }
    }

    pub async fn revoke(&self, revoke_once: bool) -> Result<(), HopperError> {
        self.hopper.revoke_by_id(&self.id, None, revoke_once).await
    }

    pub async fn restore(&self) -> Result<bool, HopperError> {
        self.hopper.restore_by_id(&self.id).await
    }

    /// Drop the cached record so the next read hits the store again.
    pub fn reset(&self) {
        *self.cached.lock().unwrap() = None;
    }

    /// Revoke the current instance and enqueue a fresh task (new id) with
    /// the same payload and retry settings at the new ETA. Nothing checks
    /// whether the original already ran.
    pub async fn reschedule(&self, at: ScheduleAt) -> Result<Option<ResultHandle>, HopperError> {
        let task = self.task.as_ref().ok_or_else(|| {
            HopperError::Configuration(
                "cannot reschedule a result handle created from a bare id".to_string(),
            )
        })?;
        self.revoke(true).await?;

        let fresh = Task::new(task.name.clone(), task.args.clone(), task.kwargs.clone())
            .with_retries(task.retries, task.retry_delay_secs)
            .with_eta(Some(at.resolve(chrono::Utc::now())));
        Ok(self
            .hopper
            .enqueue(fresh)
            .await?
            .map(EnqueueResult::into_first))
    }
}

/// Results for a group of tasks, e.g. a `map` call or a continuation chain.
pub struct ResultGroup {
    handles: Vec<ResultHandle>,
}

impl ResultGroup {
    pub(crate) fn new(handles: Vec<ResultHandle>) -> Self {
        Self { handles }
    }

    pub fn handles(&self) -> &[ResultHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn get(&self, options: &GetOptions) -> Result<Vec<Option<Value>>, HopperError> {
        let mut values = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            values.push(handle.get(options).await?);
        }
        Ok(values)
    }
}

impl IntoIterator for ResultGroup {
    type Item = ResultHandle;
    type IntoIter = std::vec::IntoIter<ResultHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}
