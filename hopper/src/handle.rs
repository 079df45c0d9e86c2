use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use crate::dispatch::{EnqueueResult, Hopper};
use crate::error::HopperError;
use crate::result::{ResultGroup, ResultHandle};
use crate::task::Task;

/// Default retry settings applied to every invocation built through a
/// handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl TaskOptions {
    pub fn retries(retries: u32, retry_delay_secs: u64) -> Self {
        Self {
            retries,
            retry_delay_secs,
        }
    }
}

/// When a scheduled invocation becomes eligible to run.
#[derive(Debug, Clone, Copy)]
pub enum ScheduleAt {
    Eta(DateTime<Utc>),
    Delay(std::time::Duration),
}

impl ScheduleAt {
    pub(crate) fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ScheduleAt::Eta(eta) => *eta,
            ScheduleAt::Delay(delay) => {
                now + TimeDelta::from_std(*delay).unwrap_or(TimeDelta::zero())
            }
        }
    }
}

/// Producer-side surface of one registered task.
#[derive(Clone)]
pub struct TaskHandle {
    hopper: Hopper,
    name: String,
    options: TaskOptions,
}

impl TaskHandle {
    pub(crate) fn new(hopper: Hopper, name: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            hopper,
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build an invocation without enqueueing it; the building block for
    /// chains (`s(..).then(other.s(..))`).
    pub fn s(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Task {
        Task::new(self.name.clone(), args, kwargs)
            .with_retries(self.options.retries, self.options.retry_delay_secs)
    }

    /// Enqueue one invocation. Returns a result handle unless results are
    /// disabled.
    pub async fn call(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Option<ResultHandle>, HopperError> {
        let outcome = self.hopper.enqueue(self.s(args, kwargs)).await?;
        Ok(outcome.map(EnqueueResult::into_first))
    }

    /// Enqueue one invocation that becomes eligible at `at`.
    pub async fn schedule(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        at: ScheduleAt,
        id: Option<String>,
    ) -> Result<Option<ResultHandle>, HopperError> {
        let mut task = self.s(args, kwargs).with_eta(Some(at.resolve(Utc::now())));
        if let Some(id) = id {
            task = task.with_id(id);
        }
        let outcome = self.hopper.enqueue(task).await?;
        Ok(outcome.map(EnqueueResult::into_first))
    }

    /// Enqueue one invocation per argument set. The group is empty when
    /// results are disabled.
    pub async fn map(&self, arg_sets: Vec<Vec<Value>>) -> Result<ResultGroup, HopperError> {
        let mut handles = Vec::with_capacity(arg_sets.len());
        for args in arg_sets {
            if let Some(outcome) = self.hopper.enqueue(self.s(args, Map::new())).await? {
                handles.push(outcome.into_first());
            }
        }
        Ok(ResultGroup::new(handles))
    }

    /// Run the task body directly on the caller, bypassing the queue,
    /// hooks, signals and the result store.
    pub async fn call_local(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, HopperError> {
        self.hopper.call_local(&self.name, args, kwargs).await
    }

    /// Revoke every invocation of this task class.
    pub async fn revoke(
        &self,
        revoke_until: Option<DateTime<Utc>>,
        revoke_once: bool,
    ) -> Result<(), HopperError> {
        self.hopper
            .revoke_all(&self.name, revoke_until, revoke_once)
            .await
    }

    /// Lift a class-level revocation. Returns whether one was in place.
    pub async fn restore(&self) -> Result<bool, HopperError> {
        self.hopper.restore_all(&self.name).await
    }

    pub async fn is_revoked(&self, now: Option<DateTime<Utc>>) -> Result<bool, HopperError> {
        self.hopper.is_revoked_class(&self.name, now, true).await
    }

    /// Remove this task from the dispatcher's registry.
    pub fn unregister(&self) -> bool {
        self.hopper.unregister(&self.name)
    }
}
