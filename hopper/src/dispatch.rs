use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Instant,
};

use chrono::{DateTime, TimeDelta, Utc};
use hopper_lib::{HookError, Serializer, TaskError};
use hopper_storage::{BlackHoleStorage, MemoryStorage, Storage};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::consumer::{Consumer, ConsumerOptions};
use crate::error::HopperError;
use crate::executor::{TaskContext, TaskExecutor};
use crate::handle::{TaskHandle, TaskOptions};
use crate::lock::TaskLock;
use crate::registry::{RegisteredTask, Registry};
use crate::result::{ErrorRecord, ResultGroup, ResultHandle, StoredResult};
use crate::schedule::Schedule;
use crate::signal::{Signal, SignalBus, SignalReceiver};
use crate::task::Task;

/// Broker driver selection. Unavailable drivers are compiled out behind
/// cargo features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    Memory,
    BlackHole,
    #[cfg(feature = "redis-db")]
    Redis(hopper_storage::RedisStorageConfig),
    #[cfg(feature = "sqlite")]
    Sqlite(hopper_storage::SqliteStorageConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue name; namespaces every broker key.
    pub name: String,
    /// Store task return values and error records.
    pub results: bool,
    /// Record null return values too.
    pub store_none: bool,
    /// Execute synchronously on the producer instead of going through the
    /// broker. For development and tests.
    pub immediate: bool,
    /// In immediate mode, swap the broker for a fresh in-memory one.
    pub immediate_use_memory: bool,
    /// Compress serialized payloads.
    pub compression: bool,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "hopper".to_string(),
            results: true,
            store_none: false,
            immediate: false,
            immediate_use_memory: true,
            compression: false,
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

fn build_storage(name: &str, config: &StorageConfig) -> Result<Arc<dyn Storage>, HopperError> {
    Ok(match config {
        StorageConfig::Memory => Arc::new(MemoryStorage::new(name)),
        StorageConfig::BlackHole => Arc::new(BlackHoleStorage::new(name)),
        #[cfg(feature = "redis-db")]
        StorageConfig::Redis(cfg) => {
            Arc::new(hopper_storage::RedisStorage::open(name, cfg.clone())?)
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite(cfg) => {
            Arc::new(hopper_storage::SqliteStorage::open(name, cfg.clone())?)
        }
    })
}

type PreHook = Box<dyn Fn(&Task) -> Result<(), HookError> + Send + Sync>;
type PostHook =
    Box<dyn Fn(&Task, Option<&Value>, Option<&TaskError>) -> anyhow::Result<()> + Send + Sync>;
type StartupHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Hooks {
    pre: RwLock<Vec<(String, PreHook)>>,
    post: RwLock<Vec<(String, PostHook)>>,
    startup: RwLock<Vec<(String, StartupHook)>>,
}

fn upsert_hook<T>(table: &RwLock<Vec<(String, T)>>, name: String, hook: T) {
    let mut table = table.write().unwrap();
    match table.iter_mut().find(|(existing, _)| *existing == name) {
        Some(slot) => slot.1 = hook,
        None => table.push((name, hook)),
    }
}

fn remove_hook<T>(table: &RwLock<Vec<(String, T)>>, name: &str) -> bool {
    let mut table = table.write().unwrap();
    let before = table.len();
    table.retain(|(existing, _)| existing != name);
    table.len() != before
}

/// What `enqueue` hands back when results are enabled: a single handle, or
/// one handle per link when the task carries an on-complete chain.
pub enum EnqueueResult {
    One(ResultHandle),
    Chain(ResultGroup),
}

impl EnqueueResult {
    /// The handle for the head task.
    pub fn into_first(self) -> ResultHandle {
        match self {
            EnqueueResult::One(handle) => handle,
            EnqueueResult::Chain(group) => group
                .into_iter()
                .next()
                .expect("chain group always contains the head task"),
        }
    }

    pub fn into_group(self) -> ResultGroup {
        match self {
            EnqueueResult::One(handle) => ResultGroup::new(vec![handle]),
            EnqueueResult::Chain(group) => group,
        }
    }
}

struct Inner {
    name: String,
    results: bool,
    store_none: bool,
    immediate_use_memory: bool,
    immediate: AtomicBool,
    serializer: Serializer,
    default_storage: Arc<dyn Storage>,
    storage: RwLock<Arc<dyn Storage>>,
    registry: Registry,
    signals: SignalBus,
    hooks: Hooks,
    locks: Mutex<HashSet<String>>,
}

/// The dispatcher: mediates between the broker and user code for the whole
/// task lifecycle — enqueue, dequeue, execute, retry, chain, revoke,
/// schedule.
///
/// Cloning is cheap and every clone shares registry, hooks and broker
/// handle. Storage is the only cross-process shared state; everything else
/// is per-instance.
#[derive(Clone)]
pub struct Hopper {
    inner: Arc<Inner>,
}

impl Hopper {
    pub fn new(config: Config) -> Result<Self, HopperError> {
        let serializer = Serializer::new(config.compression);
        let default_storage = build_storage(&config.name, &config.storage)?;
        let storage: Arc<dyn Storage> = if config.immediate && config.immediate_use_memory {
            Arc::new(MemoryStorage::new(config.name.clone()))
        } else {
            default_storage.clone()
        };
        Ok(Self {
            inner: Arc::new(Inner {
                name: config.name,
                results: config.results,
                store_none: config.store_none,
                immediate_use_memory: config.immediate_use_memory,
                immediate: AtomicBool::new(config.immediate),
                serializer,
                default_storage,
                storage: RwLock::new(storage),
                registry: Registry::new(),
                signals: SignalBus::default(),
                hooks: Hooks::default(),
                locks: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn results_enabled(&self) -> bool {
        self.inner.results
    }

    pub fn is_immediate(&self) -> bool {
        self.inner.immediate.load(Ordering::SeqCst)
    }

    /// Toggle immediate mode. With `immediate_use_memory` the broker handle
    /// is swapped for a fresh in-memory one, so work already sitting on the
    /// external broker is not visible until toggled back.
    pub fn set_immediate(&self, value: bool) {
        let previous = self.inner.immediate.swap(value, Ordering::SeqCst);
        if previous == value || !self.inner.immediate_use_memory {
            return;
        }
        let mut storage = self.inner.storage.write().unwrap();
        *storage = if value {
            Arc::new(MemoryStorage::new(self.inner.name.clone()))
        } else {
            self.inner.default_storage.clone()
        };
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.inner.storage.read().unwrap().clone()
    }

    pub(crate) fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn create_consumer(&self, options: ConsumerOptions) -> Consumer {
        Consumer::new(self.clone(), options)
    }

    // ------------------------------------------------------------------
    // Registration

    /// Register a task body under `name` and return its producer-side
    /// handle.
    pub fn task(
        &self,
        name: impl Into<String>,
        options: TaskOptions,
        executor: impl TaskExecutor + 'static,
    ) -> Result<TaskHandle, HopperError> {
        let name = name.into();
        self.inner.registry.register(RegisteredTask {
            name: name.clone(),
            executor: Arc::new(executor),
            retries: options.retries,
            retry_delay_secs: options.retry_delay_secs,
            schedule: None,
        })?;
        Ok(TaskHandle::new(self.clone(), name, options))
    }

    /// Register a periodic task: enqueued by the consumer whenever
    /// `schedule` matches the current timestamp. Periodic tasks never store
    /// results.
    pub fn periodic_task(
        &self,
        name: impl Into<String>,
        schedule: impl Schedule + 'static,
        options: TaskOptions,
        executor: impl TaskExecutor + 'static,
    ) -> Result<TaskHandle, HopperError> {
        let name = name.into();
        self.inner.registry.register(RegisteredTask {
            name: name.clone(),
            executor: Arc::new(executor),
            retries: options.retries,
            retry_delay_secs: options.retry_delay_secs,
            schedule: Some(Arc::new(schedule)),
        })?;
        Ok(TaskHandle::new(self.clone(), name, options))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.inner.registry.unregister(name)
    }

    // ------------------------------------------------------------------
    // Signals and hooks

    pub fn connect_signal(
        &self,
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = Signal>,
        receiver: impl Fn(Signal, &Task, Option<&TaskError>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) {
        let receiver: SignalReceiver = Box::new(receiver);
        self.inner.signals.connect(name, kinds, receiver);
    }

    pub fn disconnect_signal(&self, name: &str) -> bool {
        self.inner.signals.disconnect(name)
    }

    fn emit(&self, signal: Signal, task: &Task, err: Option<&TaskError>) {
        self.inner.signals.send(signal, task, err);
    }

    pub fn add_pre_execute(
        &self,
        name: impl Into<String>,
        hook: impl Fn(&Task) -> Result<(), HookError> + Send + Sync + 'static,
    ) {
        upsert_hook(&self.inner.hooks.pre, name.into(), Box::new(hook));
    }

    pub fn unregister_pre_execute(&self, name: &str) -> bool {
        remove_hook(&self.inner.hooks.pre, name)
    }

    pub fn add_post_execute(
        &self,
        name: impl Into<String>,
        hook: impl Fn(&Task, Option<&Value>, Option<&TaskError>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) {
        upsert_hook(&self.inner.hooks.post, name.into(), Box::new(hook));
    }

    pub fn unregister_post_execute(&self, name: &str) -> bool {
        remove_hook(&self.inner.hooks.post, name)
    }

    pub fn add_on_startup(
        &self,
        name: impl Into<String>,
        hook: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        upsert_hook(&self.inner.hooks.startup, name.into(), Box::new(hook));
    }

    pub fn unregister_on_startup(&self, name: &str) -> bool {
        remove_hook(&self.inner.hooks.startup, name)
    }

    /// Returns false when a hook canceled execution.
    fn run_pre_hooks(&self, task: &Task) -> bool {
        let hooks = self.inner.hooks.pre.read().unwrap();
        for (name, hook) in hooks.iter() {
            debug!("pre-execute hook {name} for {task}");
            match hook(task) {
                Ok(()) => {}
                Err(HookError::Cancel) => {
                    warn!("task {task} canceled by pre-execute hook {name}");
                    return false;
                }
                Err(HookError::Other(err)) => {
                    error!("unhandled error in pre-execute hook {name} for {task}: {err:?}");
                }
            }
        }
        true
    }

    fn run_post_hooks(&self, task: &Task, value: Option<&Value>, err: Option<&TaskError>) {
        let hooks = self.inner.hooks.post.read().unwrap();
        for (name, hook) in hooks.iter() {
            debug!("post-execute hook {name} for {task}");
            if let Err(hook_err) = hook(task, value, err) {
                error!("unhandled error in post-execute hook {name} for {task}: {hook_err:?}");
            }
        }
    }

    pub(crate) fn run_startup_hooks(&self) {
        let hooks = self.inner.hooks.startup.read().unwrap();
        for (name, hook) in hooks.iter() {
            if let Err(err) = hook() {
                error!("unhandled error in startup hook {name}: {err:?}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Message codec

    pub fn serialize_task(&self, task: &Task) -> Result<Vec<u8>, HopperError> {
        let message = self.inner.registry.create_message(task)?;
        Ok(self.inner.serializer.serialize(&message)?)
    }

    pub fn deserialize_task(&self, data: &[u8]) -> Result<Task, HopperError> {
        let message = self.inner.serializer.deserialize(data)?;
        self.inner.registry.create_task(message)
    }

    // ------------------------------------------------------------------
    // Enqueue / execute

    /// Enqueue a task for execution. In immediate mode the task executes
    /// synchronously on the caller before this returns. The result handles
    /// are `None` when results are disabled.
    pub async fn enqueue(&self, task: Task) -> Result<Option<EnqueueResult>, HopperError> {
        self.emit(Signal::Enqueued, &task, None);
        if self.is_immediate() {
            let handles = self.result_handles(&task);
            self.execute(task, None).await?;
            if !self.inner.results {
                return Ok(None);
            }
            return Ok(Some(handles));
        }

        let data = self.serialize_task(&task)?;
        self.storage().enqueue(data).await?;
        if !self.inner.results {
            return Ok(None);
        }
        Ok(Some(self.result_handles(&task)))
    }

    fn enqueue_boxed<'a>(
        &'a self,
        task: Task,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<EnqueueResult>, HopperError>> + Send + 'a>,
    > {
        Box::pin(self.enqueue(task))
    }

    fn result_handles(&self, task: &Task) -> EnqueueResult {
        if task.on_complete.is_none() {
            return EnqueueResult::One(ResultHandle::new(self.clone(), task.clone()));
        }
        let mut handles = Vec::new();
        let mut current = Some(task);
        while let Some(link) = current {
            handles.push(ResultHandle::new(self.clone(), link.clone()));
            current = link.on_complete.as_deref();
        }
        EnqueueResult::Chain(ResultGroup::new(handles))
    }

    /// Pull the next task off the broker, if any.
    pub async fn dequeue(&self) -> Result<Option<Task>, HopperError> {
        match self.storage().dequeue().await? {
            Some(data) => Ok(Some(self.deserialize_task(&data)?)),
            None => Ok(None),
        }
    }

    /// Run a task now: route it to the schedule when its ETA is in the
    /// future, skip it when revoked, otherwise execute the body and drive
    /// results, hooks, continuations and retries.
    pub async fn execute(
        &self,
        task: Task,
        now: Option<DateTime<Utc>>,
    ) -> Result<Option<Value>, HopperError> {
        let now = now.unwrap_or_else(Utc::now);
        if !self.ready_to_run(&task, now) {
            self.add_schedule(&task).await?;
            return Ok(None);
        }
        if self.is_revoked(&task, Some(now), false).await? {
            warn!("task {task} was revoked, not executing");
            self.emit(Signal::Revoked, &task, None);
            return Ok(None);
        }
        info!("executing {task}");
        self.emit(Signal::Executing, &task, None);
        self.run_task(task, now).await
    }

    async fn run_task(
        &self,
        mut task: Task,
        now: DateTime<Utc>,
    ) -> Result<Option<Value>, HopperError> {
        if !self.run_pre_hooks(&task) {
            self.emit(Signal::Canceled, &task, None);
            return Ok(None);
        }

        let entry = self
            .inner
            .registry
            .get(&task.name)
            .ok_or_else(|| HopperError::UnknownTask(task.name.clone()))?;

        let started = Instant::now();
        let ctx = TaskContext::for_task(&task);
        let outcome = entry
            .executor
            .execute(task.args.clone(), task.kwargs.clone(), ctx)
            .await;
        let duration = started.elapsed();

        let (value, exception): (Option<Value>, Option<TaskError>) = match outcome {
            Ok(value) => {
                info!("{task} executed in {:.3}s", duration.as_secs_f64());
                self.emit(Signal::Complete, &task, None);
                (Some(value), None)
            }
            Err(TaskError::Locked(name)) => {
                warn!("task {} not run, unable to acquire lock", task.id());
                let err = TaskError::Locked(name);
                self.emit(Signal::Locked, &task, Some(&err));
                (None, Some(err))
            }
            Err(TaskError::Retry) => {
                info!("task {} requested retry", task.id());
                if task.retries == 0 {
                    task.retries = 1;
                }
                (None, Some(TaskError::Retry))
            }
            Err(TaskError::Interrupted) => {
                warn!("received exit signal, task {} did not finish", task.id());
                return Ok(None);
            }
            Err(err) => {
                error!("unhandled error in task {}: {err:?}", task.id());
                self.emit(Signal::Error, &task, Some(&err));
                (None, Some(err))
            }
        };

        if self.inner.results && !entry.is_periodic() {
            match &exception {
                // Lock contention leaves no error record.
                Some(TaskError::Locked(_)) => {}
                Some(err) => {
                    let record = StoredResult::Error(ErrorRecord {
                        error: err.to_string(),
                        retries: task.retries,
                        traceback: err.chain_text(),
                    });
                    self.put(task.id(), &record).await?;
                }
                None => {
                    if let Some(value) = &value {
                        if !value.is_null() || self.inner.store_none {
                            self.put(task.id(), &StoredResult::Value(value.clone()))
                                .await?;
                        }
                    }
                }
            }
        }

        self.run_post_hooks(&task, value.as_ref(), exception.as_ref());

        match &exception {
            None => {
                if let Some(next) = &task.on_complete {
                    let mut next = (**next).clone();
                    if let Some(value) = value.clone() {
                        next.extend_data(value);
                    }
                    self.enqueue_boxed(next).await?;
                }
            }
            Some(err) => {
                if let Some(next) = &task.on_error {
                    let mut next = (**next).clone();
                    next.extend_data(Value::String(err.to_string()));
                    self.enqueue_boxed(next).await?;
                }
            }
        }

        if exception.is_some() && task.retries > 0 {
            self.emit(Signal::Retrying, &task, None);
            self.requeue_task(task, now).await?;
            return Ok(None);
        }

        Ok(if exception.is_none() { value } else { None })
    }

    async fn requeue_task(&self, mut task: Task, now: DateTime<Utc>) -> Result<(), HopperError> {
        task.retries -= 1;
        info!("requeueing {}, {} retries remaining", task.id(), task.retries);
        if task.retry_delay_secs > 0 {
            task.eta = Some(now + TimeDelta::seconds(task.retry_delay_secs as i64));
            self.add_schedule(&task).await?;
        } else {
            self.enqueue_boxed(task).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling

    pub fn ready_to_run(&self, task: &Task, now: DateTime<Utc>) -> bool {
        task.eta.map_or(true, |eta| eta <= now)
    }

    pub async fn add_schedule(&self, task: &Task) -> Result<(), HopperError> {
        let data = self.serialize_task(task)?;
        let eta = task.eta.unwrap_or(DateTime::UNIX_EPOCH);
        self.storage().add_to_schedule(data, eta).await?;
        info!("added task {} to schedule, eta {eta}", task.id());
        self.emit(Signal::Scheduled, task, None);
        Ok(())
    }

    /// Drain every schedule entry due at `now`. Entries whose task is no
    /// longer registered are logged and dropped.
    pub async fn read_schedule(
        &self,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Task>, HopperError> {
        let now = now.unwrap_or_else(Utc::now);
        let mut tasks = Vec::new();
        for data in self.storage().read_schedule(now).await? {
            match self.deserialize_task(&data) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("dropping undecodable schedule entry: {err}"),
            }
        }
        Ok(tasks)
    }

    /// Fresh invocations (empty args, new ids) for every periodic task
    /// whose predicate matches `now`.
    pub fn read_periodic(&self, now: Option<DateTime<Utc>>) -> Vec<Task> {
        let now = now.unwrap_or_else(Utc::now);
        self.inner
            .registry
            .periodic_entries()
            .into_iter()
            .filter(|entry| {
                entry
                    .schedule
                    .as_ref()
                    .map_or(false, |schedule| schedule.matches(now))
            })
            .map(|entry| {
                Task::new(entry.name.clone(), Vec::new(), Map::new())
                    .with_retries(entry.retries, entry.retry_delay_secs)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Revocation

    /// Evaluate a revocation record: (is_revoked, should_clear).
    async fn check_revoked(
        &self,
        key: &str,
        now: DateTime<Utc>,
        peek: bool,
    ) -> Result<(bool, bool), HopperError> {
        let Some(raw) = self.storage().peek_data(key).await? else {
            return Ok((false, false));
        };
        let (revoke_until, revoke_once): (Option<DateTime<Utc>>, bool) =
            self.inner.serializer.deserialize(&raw)?;
        if revoke_once {
            // Revoked for one run; the first non-peek observation clears it.
            Ok((true, !peek))
        } else if revoke_until.is_some_and(|until| until <= now) {
            // Expired; clear on first non-peek observation.
            Ok((false, !peek))
        } else {
            Ok((true, false))
        }
    }

    async fn check_and_clear(
        &self,
        key: &str,
        now: DateTime<Utc>,
        peek: bool,
    ) -> Result<bool, HopperError> {
        let (revoked, clear) = self.check_revoked(key, now, peek).await?;
        if clear {
            self.storage().pop_data(key).await?;
        }
        Ok(revoked)
    }

    /// Is this instance revoked, either by its own record or a class-level
    /// one? Non-peek observations consume one-shot and expired records.
    pub async fn is_revoked(
        &self,
        task: &Task,
        now: Option<DateTime<Utc>>,
        peek: bool,
    ) -> Result<bool, HopperError> {
        let now = now.unwrap_or_else(Utc::now);
        if self.check_and_clear(&task.revoke_id(), now, peek).await? {
            return Ok(true);
        }
        self.is_revoked_class(&task.name, Some(now), peek).await
    }

    pub async fn is_revoked_by_id(
        &self,
        id: &str,
        now: Option<DateTime<Utc>>,
        peek: bool,
    ) -> Result<bool, HopperError> {
        let now = now.unwrap_or_else(Utc::now);
        self.check_and_clear(&format!("r:{id}"), now, peek).await
    }

    pub async fn is_revoked_class(
        &self,
        name: &str,
        now: Option<DateTime<Utc>>,
        peek: bool,
    ) -> Result<bool, HopperError> {
        let now = now.unwrap_or_else(Utc::now);
        self.check_and_clear(&Task::class_revoke_key(name), now, peek)
            .await
    }

    pub async fn revoke(
        &self,
        task: &Task,
        revoke_until: Option<DateTime<Utc>>,
        revoke_once: bool,
    ) -> Result<(), HopperError> {
        self.put(&task.revoke_id(), &(revoke_until, revoke_once))
            .await
    }

    pub async fn revoke_by_id(
        &self,
        id: &str,
        revoke_until: Option<DateTime<Utc>>,
        revoke_once: bool,
    ) -> Result<(), HopperError> {
        self.put(&format!("r:{id}"), &(revoke_until, revoke_once))
            .await
    }

    /// Revoke every instance of a task class.
    pub async fn revoke_all(
        &self,
        name: &str,
        revoke_until: Option<DateTime<Utc>>,
        revoke_once: bool,
    ) -> Result<(), HopperError> {
        self.put(&Task::class_revoke_key(name), &(revoke_until, revoke_once))
            .await
    }

    /// Lift an instance revocation; returns whether one was in place.
    pub async fn restore(&self, task: &Task) -> Result<bool, HopperError> {
        Ok(self.storage().pop_data(&task.revoke_id()).await?.is_some())
    }

    pub async fn restore_by_id(&self, id: &str) -> Result<bool, HopperError> {
        Ok(self.storage().pop_data(&format!("r:{id}")).await?.is_some())
    }

    pub async fn restore_all(&self, name: &str) -> Result<bool, HopperError> {
        Ok(self
            .storage()
            .pop_data(&Task::class_revoke_key(name))
            .await?
            .is_some())
    }

    // ------------------------------------------------------------------
    // Key/value helpers

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), HopperError> {
        let data = self.inner.serializer.serialize(value)?;
        Ok(self.storage().put_data(key, data).await?)
    }

    pub async fn put_if_empty<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, HopperError> {
        let data = self.inner.serializer.serialize(value)?;
        Ok(self.storage().put_if_empty(key, data).await?)
    }

    pub async fn get_raw(&self, key: &str, peek: bool) -> Result<Option<Vec<u8>>, HopperError> {
        if peek {
            Ok(self.storage().peek_data(key).await?)
        } else {
            Ok(self.storage().pop_data(key).await?)
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        peek: bool,
    ) -> Result<Option<T>, HopperError> {
        match self.get_raw(key, peek).await? {
            Some(data) => Ok(Some(self.inner.serializer.deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, HopperError> {
        Ok(self.storage().delete_data(key).await?)
    }

    // ------------------------------------------------------------------
    // Results

    /// One-shot read of a result by task id.
    pub async fn result(
        &self,
        id: &str,
        options: &crate::result::GetOptions,
    ) -> Result<Option<Value>, HopperError> {
        ResultHandle::from_id(self.clone(), id).get(options).await
    }

    // ------------------------------------------------------------------
    // Locks

    pub fn lock_task(&self, name: impl Into<String>) -> TaskLock {
        TaskLock::new(self.clone(), name)
    }

    pub(crate) fn track_lock_key(&self, key: &str) {
        self.inner.locks.lock().unwrap().insert(key.to_string());
    }

    /// Clear every known lock; returns the names that were actually held.
    pub async fn flush_locks(&self) -> Result<HashSet<String>, HopperError> {
        let keys: Vec<String> = self.inner.locks.lock().unwrap().iter().cloned().collect();
        let mut flushed = HashSet::new();
        for key in keys {
            if self.storage().pop_data(&key).await?.is_some() {
                let name = key
                    .split_once(".lock.")
                    .map(|(_, name)| name.to_string())
                    .unwrap_or(key);
                flushed.insert(name);
            }
        }
        Ok(flushed)
    }

    // ------------------------------------------------------------------
    // Inspection

    pub async fn pending(&self, limit: Option<usize>) -> Result<Vec<Task>, HopperError> {
        let mut tasks = Vec::new();
        for data in self.storage().enqueued_items(limit).await? {
            match self.deserialize_task(&data) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("dropping undecodable queued message: {err}"),
            }
        }
        Ok(tasks)
    }

    pub async fn pending_count(&self) -> Result<usize, HopperError> {
        Ok(self.storage().queue_size().await?)
    }

    pub async fn scheduled(&self, limit: Option<usize>) -> Result<Vec<Task>, HopperError> {
        let mut tasks = Vec::new();
        for data in self.storage().scheduled_items(limit).await? {
            match self.deserialize_task(&data) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("dropping undecodable schedule entry: {err}"),
            }
        }
        Ok(tasks)
    }

    pub async fn scheduled_count(&self) -> Result<usize, HopperError> {
        Ok(self.storage().schedule_size().await?)
    }

    pub async fn all_results(&self) -> Result<HashMap<String, Vec<u8>>, HopperError> {
        Ok(self.storage().result_items().await?)
    }

    pub async fn result_count(&self) -> Result<usize, HopperError> {
        Ok(self.storage().result_store_size().await?)
    }

    pub async fn flush(&self) -> Result<(), HopperError> {
        Ok(self.storage().flush_all().await?)
    }

    // ------------------------------------------------------------------
    // Local execution

    /// Run a registered task body directly, bypassing the queue, hooks,
    /// signals and the result store.
    pub async fn call_local(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, HopperError> {
        let entry = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| HopperError::UnknownTask(name.to_string()))?;
        let task = Task::new(name, args, kwargs);
        let ctx = TaskContext::for_task(&task);
        entry
            .executor
            .execute(task.args, task.kwargs, ctx)
            .await
            .map_err(HopperError::Task)
    }
}
