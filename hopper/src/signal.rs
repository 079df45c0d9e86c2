use std::{
    collections::HashSet,
    fmt,
    sync::RwLock,
};

use hopper_lib::TaskError;
use tracing::error;

use crate::task::Task;

/// Lifecycle events published by the dispatcher. Receivers subscribe to a
/// set of kinds; an empty set means all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Enqueued,
    Scheduled,
    Revoked,
    Executing,
    Complete,
    Error,
    Locked,
    Retrying,
    Canceled,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Enqueued => "enqueued",
            Signal::Scheduled => "scheduled",
            Signal::Revoked => "revoked",
            Signal::Executing => "executing",
            Signal::Complete => "complete",
            Signal::Error => "error",
            Signal::Locked => "locked",
            Signal::Retrying => "retrying",
            Signal::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SignalReceiver =
    Box<dyn Fn(Signal, &Task, Option<&TaskError>) -> anyhow::Result<()> + Send + Sync>;

struct SignalEntry {
    name: String,
    kinds: HashSet<Signal>,
    receiver: SignalReceiver,
}

/// Synchronous publish-subscribe bus. Receivers run in connection order on
/// the emitting worker; their failures are logged, never propagated.
#[derive(Default)]
pub(crate) struct SignalBus {
    entries: RwLock<Vec<SignalEntry>>,
}

impl SignalBus {
    pub fn connect(
        &self,
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = Signal>,
        receiver: SignalReceiver,
    ) {
        let name = name.into();
        let entry = SignalEntry {
            kinds: kinds.into_iter().collect(),
            receiver,
            name: name.clone(),
        };
        let mut entries = self.entries.write().unwrap();
        match entries.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn disconnect(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.name != name);
        entries.len() != before
    }

    pub fn send(&self, signal: Signal, task: &Task, err: Option<&TaskError>) {
        let entries = self.entries.read().unwrap();
        for entry in entries.iter() {
            if !entry.kinds.is_empty() && !entry.kinds.contains(&signal) {
                continue;
            }
            if let Err(receiver_err) = (entry.receiver)(signal, task, err) {
                error!(
                    "error sending signal \"{signal}\" to receiver {}: {receiver_err:?}",
                    entry.name
                );
            }
        }
    }
}
