use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use halin_advisor::redact;

/// Default number of events retained.
pub const DEFAULT_EVENT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "adduser")]
    UserCreated,
    #[serde(rename = "deleteuser")]
    UserDeleted,
    #[serde(rename = "addrole")]
    RoleCreated,
    #[serde(rename = "deleterole")]
    RoleDeleted,
    #[serde(rename = "associateroles")]
    RolesAssociated,
    #[serde(rename = "diagnostics")]
    DiagnosticsCollected,
    #[serde(rename = "connect")]
    Connected,
}

/// An administrative action, as shown in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// A new event; any `password` field in `payload` is masked.
    pub fn new(kind: EventKind, message: impl Into<String>, mut payload: Value) -> Self {
        redact(&mut payload);
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            message: message.into(),
            date: Utc::now(),
            payload,
        }
    }
}

/// Bounded in-memory log with live fan-out.
pub struct EventLog {
    recent: Mutex<VecDeque<Event>>,
    sender: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            sender,
            capacity,
        }
    }

    pub fn record(&self, kind: EventKind, message: impl Into<String>, payload: Value) -> Event {
        let event = Event::new(kind, message, payload);
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        // No listeners is fine.
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained events as JSON, for the diagnostic snapshot.
    pub fn to_values(&self) -> Vec<Value> {
        self.events()
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
