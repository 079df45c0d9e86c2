use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::error::HopperError;
use crate::executor::TaskExecutor;
use crate::schedule::Schedule;
use crate::task::{Task, TaskMessage};

/// Continuation chains longer than this refuse to serialize.
const MAX_CHAIN_DEPTH: usize = 64;

/// A task name bound to its executor, default retry settings, and (for
/// periodic tasks) the predicate deciding when it fires.
pub struct RegisteredTask {
    pub name: String,
    pub executor: Arc<dyn TaskExecutor>,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub schedule: Option<Arc<dyn Schedule>>,
}

impl RegisteredTask {
    pub fn is_periodic(&self) -> bool {
        self.schedule.is_some()
    }
}

/// Name ↔ task binding for one dispatcher instance. Writes are rare after
/// startup; reads happen on every execute.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<RegisteredTask>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: RegisteredTask) -> Result<(), HopperError> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&entry.name) {
            return Err(HopperError::Configuration(format!(
                "task \"{}\" is already registered",
                entry.name
            )));
        }
        entries.insert(entry.name.clone(), Arc::new(entry));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTask>> {
        self.entries.read().unwrap().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    pub fn periodic_entries(&self) -> Vec<Arc<RegisteredTask>> {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|entry| entry.is_periodic())
            .cloned()
            .collect()
    }

    /// Capture a task (and its continuations, recursively) as a wire
    /// message.
    pub fn create_message(&self, task: &Task) -> Result<TaskMessage, HopperError> {
        self.message_at_depth(task, 0)
    }

    fn message_at_depth(&self, task: &Task, depth: usize) -> Result<TaskMessage, HopperError> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(HopperError::Configuration(format!(
                "continuation chain exceeds {MAX_CHAIN_DEPTH} tasks"
            )));
        }
        let on_complete = match &task.on_complete {
            Some(next) => Some(Box::new(self.message_at_depth(next, depth + 1)?)),
            None => None,
        };
        let on_error = match &task.on_error {
            Some(next) => Some(Box::new(self.message_at_depth(next, depth + 1)?)),
            None => None,
        };
        Ok(TaskMessage {
            name: task.name.clone(),
            id: task.id().to_string(),
            args: task.args.clone(),
            kwargs: task.kwargs.clone(),
            eta: task.eta,
            retries: task.retries,
            retry_delay_secs: task.retry_delay_secs,
            on_complete,
            on_error,
        })
    }

    /// Rebuild a task from a wire message, re-linking continuations.
    /// Fails with `UnknownTask` when any name in the chain is not
    /// registered here.
    pub fn create_task(&self, message: TaskMessage) -> Result<Task, HopperError> {
        if !self.is_registered(&message.name) {
            return Err(HopperError::UnknownTask(message.name));
        }
        let on_complete = match message.on_complete {
            Some(next) => Some(Box::new(self.create_task(*next)?)),
            None => None,
        };
        let on_error = match message.on_error {
            Some(next) => Some(Box::new(self.create_task(*next)?)),
            None => None,
        };
        let mut task = Task::new(message.name, message.args, message.kwargs)
            .with_id(message.id)
            .with_eta(message.eta)
            .with_retries(message.retries, message.retry_delay_secs);
        task.on_complete = on_complete;
        task.on_error = on_error;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task_fn;
    use serde_json::{json, Map, Value};

    fn noop_entry(name: &str) -> RegisteredTask {
        RegisteredTask {
            name: name.to_string(),
            executor: Arc::new(task_fn(|_, _, _| async { Ok(Value::Null) })),
            retries: 0,
            retry_delay_secs: 0,
            schedule: None,
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = Registry::new();
        registry.register(noop_entry("job")).unwrap();
        assert!(matches!(
            registry.register(noop_entry("job")),
            Err(HopperError::Configuration(_))
        ));
        assert!(registry.unregister("job"));
        assert!(!registry.unregister("job"));
    }

    #[test]
    fn test_message_round_trip_preserves_chains() {
        let registry = Registry::new();
        for name in ["a", "b", "e"] {
            registry.register(noop_entry(name)).unwrap();
        }

        let b = Task::new("b", vec![json!(2)], Map::new()).with_retries(3, 60);
        let e = Task::new("e", vec![], Map::new());
        let mut kwargs = Map::new();
        kwargs.insert("key".to_string(), json!("value"));
        let task = Task::new("a", vec![json!(1)], kwargs)
            .with_eta(Some(chrono::Utc::now()))
            .with_retries(1, 0)
            .then(b)
            .on_failure(e);

        let message = registry.create_message(&task).unwrap();
        let round_tripped = registry.create_task(message).unwrap();
        assert_eq!(round_tripped, task);
    }

    #[test]
    fn test_unregistered_continuation_fails() {
        let registry = Registry::new();
        registry.register(noop_entry("a")).unwrap();

        let task =
            Task::new("a", vec![], Map::new()).then(Task::new("missing", vec![], Map::new()));
        let message = registry.create_message(&task).unwrap();
        assert!(matches!(
            registry.create_task(message),
            Err(HopperError::UnknownTask(name)) if name == "missing"
        ));
    }
}
