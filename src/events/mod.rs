//! Typed publish/subscribe bus.
//!
//! Topics are `(EventKind, scope)` pairs. The scope is the instance id for
//! instance events and the attempt id for sign-in events, so a consumer can
//! listen to exactly the instances or attempts it renders. Publishing to a
//! topic nobody listens on is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthStage, ChainFailure};
use crate::instance::InstanceStatus;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    ChangeUser,
    InstanceStatusUpdate,
    ProgressUpdate,
    DeviceCodeIssued,
    AuthProgress,
}

/// Structured topic key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: EventKind,
    pub scope: Option<String>,
}

impl Topic {
    pub fn change_user() -> Self {
        Self {
            kind: EventKind::ChangeUser,
            scope: None,
        }
    }

    pub fn instance_status(id: &str) -> Self {
        Self::scoped(EventKind::InstanceStatusUpdate, id)
    }

    pub fn progress(id: &str) -> Self {
        Self::scoped(EventKind::ProgressUpdate, id)
    }

    pub fn device_code(attempt: Uuid) -> Self {
        Self::scoped(EventKind::DeviceCodeIssued, &attempt.to_string())
    }

    pub fn auth_progress(attempt: Uuid) -> Self {
        Self::scoped(EventKind::AuthProgress, &attempt.to_string())
    }

    fn scoped(kind: EventKind, scope: &str) -> Self {
        Self {
            kind,
            scope: Some(scope.to_string()),
        }
    }

    /// Wire name, e.g. `instance_status_update:<id>`.
    pub fn name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}:{}", self.kind, scope),
            None => self.kind.to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Every event the launcher publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum LauncherEvent {
    ChangeUser {
        uuid: Option<String>,
    },
    InstanceStatusChanged {
        id: String,
        status: InstanceStatus,
    },
    ProgressUpdate {
        id: String,
        now: u64,
        total: u64,
    },
    DeviceCodeIssued {
        attempt: Uuid,
        generation: u64,
        url: String,
        code: String,
        expiring_in: Duration,
    },
    AuthProgress {
        attempt: Uuid,
        stage: AuthStage,
        message: String,
        failure: Option<ChainFailure>,
    },
}

#[derive(Serialize)]
struct ChangeUserPayload<'a> {
    uuid: &'a Option<String>,
}

#[derive(Serialize)]
struct ProgressPayload {
    now: u64,
    total: u64,
}

#[derive(Serialize)]
struct DeviceCodePayload<'a> {
    url: &'a str,
    code: &'a str,
    expiring_in: &'a Duration,
}

#[derive(Serialize)]
struct AuthProgressPayload<'a> {
    stage: AuthStage,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: &'a Option<ChainFailure>,
}

impl LauncherEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::ChangeUser { .. } => Topic::change_user(),
            Self::InstanceStatusChanged { id, .. } => Topic::instance_status(id),
            Self::ProgressUpdate { id, .. } => Topic::progress(id),
            Self::DeviceCodeIssued { attempt, .. } => Topic::device_code(*attempt),
            Self::AuthProgress { attempt, .. } => Topic::auth_progress(*attempt),
        }
    }

    /// JSON payload as delivered to external subscribers.
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            Self::ChangeUser { uuid } => serde_json::to_value(ChangeUserPayload { uuid }),
            Self::InstanceStatusChanged { status, .. } => serde_json::to_value(status),
            Self::ProgressUpdate { now, total, .. } => serde_json::to_value(ProgressPayload {
                now: *now,
                total: *total,
            }),
            Self::DeviceCodeIssued {
                url,
                code,
                expiring_in,
                ..
            } => serde_json::to_value(DeviceCodePayload {
                url,
                code,
                expiring_in,
            }),
            Self::AuthProgress {
                stage,
                message,
                failure,
                ..
            } => serde_json::to_value(AuthProgressPayload {
                stage: *stage,
                message,
                failure,
            }),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

type Channels = Mutex<HashMap<Topic, broadcast::Sender<LauncherEvent>>>;

/// Fan-out of [`LauncherEvent`]s to per-topic subscribers.
#[derive(Clone)]
pub struct EventBus {
    capacity: usize,
    channels: Arc<Channels>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn publish(&self, event: LauncherEvent) -> usize {
        let topic = event.topic();
        let sender = {
            let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels.get(&topic).cloned()
        };
        match sender {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let receiver = channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        drop(channels);
        debug!(topic = %topic, "Subscribed");
        Subscription {
            topic,
            receiver,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Number of topics with at least one live subscription.
    pub fn topic_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }
}

/// Live subscription to one topic. Dropping it releases the topic once no
/// other subscription shares it.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<LauncherEvent>,
    channels: Weak<Channels>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event, or `None` once the bus is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<LauncherEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<LauncherEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock().unwrap_or_else(|e| e.into_inner());
        // This receiver is still counted until the struct finishes dropping.
        let last = channels
            .get(&self.topic)
            .is_some_and(|sender| sender.receiver_count() <= 1);
        if last {
            channels.remove(&self.topic);
            debug!(topic = %self.topic, "Released topic");
        }
    }
}
