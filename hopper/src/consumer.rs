use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::Hopper;
use crate::error::HopperError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Sleep between polls when the queue is empty.
    pub poll_interval_millis: u64,
    /// How often the schedule is drained for due entries.
    pub schedule_interval_millis: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_interval_millis: 100,
            schedule_interval_millis: 1000,
        }
    }
}

/// Minimal consumer loop: dequeues and executes tasks, drains the schedule,
/// and enqueues periodic tasks once per minute. Worker-pool supervision and
/// OS signal handling are left to the embedding process.
pub struct Consumer {
    hopper: Hopper,
    options: ConsumerOptions,
}

impl Consumer {
    pub(crate) fn new(hopper: Hopper, options: ConsumerOptions) -> Self {
        Self { hopper, options }
    }

    /// Dequeue and execute at most one task. Returns whether a task was
    /// processed. Messages for unregistered tasks are logged and dropped.
    pub async fn run_once(&self, now: Option<DateTime<Utc>>) -> Result<bool, HopperError> {
        match self.hopper.dequeue().await {
            Ok(Some(task)) => {
                self.hopper.execute(task, now).await?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(HopperError::UnknownTask(name)) => {
                warn!("dropping message for unregistered task {name}");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Move due schedule entries back onto the queue. Returns how many were
    /// re-enqueued.
    pub async fn check_schedule(&self, now: Option<DateTime<Utc>>) -> Result<usize, HopperError> {
        let due = self.hopper.read_schedule(now).await?;
        let count = due.len();
        for task in due {
            self.hopper.enqueue(task).await?;
        }
        Ok(count)
    }

    /// Enqueue a fresh invocation of every periodic task matching `now`.
    pub async fn check_periodic(&self, now: Option<DateTime<Utc>>) -> Result<usize, HopperError> {
        let matched = self.hopper.read_periodic(now);
        let count = matched.len();
        for task in matched {
            self.hopper.enqueue(task).await?;
        }
        Ok(count)
    }

    /// Run until the surrounding task is cancelled: startup hooks once,
    /// then alternate schedule/periodic evaluation with queue draining.
    pub async fn run(&self) -> Result<(), HopperError> {
        info!("consumer starting for queue {}", self.hopper.name());
        self.hopper.run_startup_hooks();

        let schedule_interval =
            chrono::TimeDelta::milliseconds(self.options.schedule_interval_millis as i64);
        let mut last_schedule = Utc::now() - schedule_interval;
        let mut last_minute = None;

        loop {
            let now = Utc::now();
            if now - last_schedule >= schedule_interval {
                self.check_schedule(Some(now)).await?;
                last_schedule = now;
            }
            let minute = (now.hour(), now.minute());
            if last_minute != Some(minute) {
                self.check_periodic(Some(now)).await?;
                last_minute = Some(minute);
            }
            if !self.run_once(Some(now)).await? {
                tokio::time::sleep(Duration::from_millis(self.options.poll_interval_millis)).await;
            }
        }
    }
}
