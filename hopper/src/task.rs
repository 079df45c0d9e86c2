use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One invocation of a registered task: identity, payload, scheduling
/// metadata, retry budget and continuation links.
///
/// Continuations form a forward-linked chain; cycle freedom is the
/// producer's responsibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    id: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub eta: Option<DateTime<Utc>>,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub on_complete: Option<Box<Task>>,
    pub on_error: Option<Box<Task>>,
}

impl Task {
    pub fn new(name: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4().to_string(),
            args,
            kwargs,
            eta: None,
            retries: 0,
            retry_delay_secs: 0,
            on_complete: None,
            on_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key under which a per-instance revocation record is stored.
    pub fn revoke_id(&self) -> String {
        format!("r:{}", self.id)
    }

    /// Key under which a per-class revocation record is stored.
    pub fn class_revoke_key(name: &str) -> String {
        format!("rt:{name}")
    }

    /// Override the generated id. Only meaningful before the task has been
    /// enqueued.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_eta(mut self, eta: Option<DateTime<Utc>>) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay_secs: u64) -> Self {
        self.retries = retries;
        self.retry_delay_secs = retry_delay_secs;
        self
    }

    /// Append `next` at the end of the on-success chain.
    pub fn then(mut self, next: Task) -> Self {
        let mut slot = &mut self.on_complete;
        while let Some(link) = slot {
            slot = &mut link.on_complete;
        }
        *slot = Some(Box::new(next));
        self
    }

    /// Append `next` at the end of the on-failure chain.
    pub fn on_failure(mut self, next: Task) -> Self {
        let mut slot = &mut self.on_error;
        while let Some(link) = slot {
            slot = &mut link.on_error;
        }
        *slot = Some(Box::new(next));
        self
    }

    /// Merge a predecessor's outcome into this task's payload: an array
    /// extends the positional args, an object fills in kwargs without
    /// overwriting caller-provided keys, null is a no-op, and any other
    /// value is appended as a single positional arg.
    pub fn extend_data(&mut self, data: Value) {
        match data {
            Value::Null => {}
            Value::Array(items) => self.args.extend(items),
            Value::Object(map) => {
                for (key, value) in map {
                    self.kwargs.entry(key).or_insert(value);
                }
            }
            other => self.args.push(other),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.id)?;
        if let Some(eta) = &self.eta {
            write!(f, " @{eta}")?;
        }
        if self.retries > 0 {
            write!(f, " {} retries", self.retries)?;
        }
        if let Some(next) = &self.on_complete {
            write!(f, " -> {next}")?;
        }
        if let Some(next) = &self.on_error {
            write!(f, ", on error {next}")?;
        }
        Ok(())
    }
}

/// Wire form of a [`Task`]; continuations serialize recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub name: String,
    pub id: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub eta: Option<DateTime<Utc>>,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub on_complete: Option<Box<TaskMessage>>,
    pub on_error: Option<Box<TaskMessage>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_extend_data_array_extends_args() {
        let mut task = Task::new("t", vec![json!(1)], Map::new());
        task.extend_data(json!([2, 3]));
        assert_eq!(task.args, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_extend_data_object_does_not_overwrite() {
        let mut task = Task::new("t", vec![], kwargs(&[("a", json!(1))]));
        task.extend_data(json!({"a": 99, "b": 2}));
        assert_eq!(task.kwargs, kwargs(&[("a", json!(1)), ("b", json!(2))]));
    }

    #[test]
    fn test_extend_data_scalar_appends() {
        let mut task = Task::new("t", vec![], Map::new());
        task.extend_data(json!("value"));
        task.extend_data(Value::Null);
        assert_eq!(task.args, vec![json!("value")]);
    }

    #[test]
    fn test_then_appends_at_chain_end() {
        let a = Task::new("a", vec![], Map::new());
        let b = Task::new("b", vec![], Map::new());
        let c = Task::new("c", vec![], Map::new());
        let chained = a.then(b).then(c);

        let second = chained.on_complete.as_ref().unwrap();
        assert_eq!(second.name, "b");
        let third = second.on_complete.as_ref().unwrap();
        assert_eq!(third.name, "c");
        assert!(third.on_complete.is_none());
    }

    #[test]
    fn test_display_names_the_error_chain() {
        let fallback = Task::new("cleanup", vec![], Map::new());
        let fallback_id = fallback.id().to_string();
        let task = Task::new("work", vec![], Map::new()).on_failure(fallback);

        let rendered = task.to_string();
        assert!(rendered.contains(&format!(", on error cleanup: {fallback_id}")));
    }
}
