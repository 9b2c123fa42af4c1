use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::status::InstanceStatus;
use crate::events::{EventBus, LauncherEvent, Subscription, Topic};

/// Last-writer-wins cache of instance statuses.
///
/// Reads never fail: an id that was never reported is `Stopped`. The registry
/// does not judge transitions; whoever drives the instance decides them.
pub struct InstanceStatusRegistry {
    statuses: RwLock<HashMap<String, InstanceStatus>>,
    bus: EventBus,
}

impl InstanceStatusRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Upsert the status of `id` and notify its subscribers.
    pub fn set_status(&self, id: &str, status: InstanceStatus) {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        statuses.insert(id.to_string(), status.clone());
        // Publish under the lock so subscribers see writes in storage order.
        self.publish(id, status);
    }

    pub fn get_status(&self, id: &str) -> InstanceStatus {
        self.statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn can_start(&self, id: &str) -> bool {
        self.get_status(id).can_start()
    }

    /// Move `id` to `Preparing` if it may start. Returns `false` and changes
    /// nothing when the instance is already active.
    pub fn try_begin(&self, id: &str) -> bool {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        let startable = statuses.get(id).map_or(true, InstanceStatus::can_start);
        if !startable {
            return false;
        }
        statuses.insert(id.to_string(), InstanceStatus::Preparing);
        self.publish(id, InstanceStatus::Preparing);
        true
    }

    /// Live status changes of one instance.
    pub fn subscribe(&self, id: &str) -> StatusSubscription {
        StatusSubscription {
            inner: self.bus.subscribe(Topic::instance_status(id)),
        }
    }

    /// Raw `progress_update` events of one instance.
    pub fn subscribe_progress(&self, id: &str) -> Subscription {
        self.bus.subscribe(Topic::progress(id))
    }

    /// Every known id with its status.
    pub fn snapshot(&self) -> Vec<(String, InstanceStatus)> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = statuses
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn publish(&self, id: &str, status: InstanceStatus) {
        debug!(instance = %id, status = status.name(), "Instance status changed");
        if let InstanceStatus::Downloading { now, total } = status {
            self.bus.publish(LauncherEvent::ProgressUpdate {
                id: id.to_string(),
                now,
                total,
            });
        }
        self.bus.publish(LauncherEvent::InstanceStatusChanged {
            id: id.to_string(),
            status,
        });
    }
}

/// Status stream for a single instance. Dropping it releases the topic.
pub struct StatusSubscription {
    inner: Subscription,
}

impl StatusSubscription {
    /// Next status written for this instance, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<InstanceStatus> {
        loop {
            match self.inner.recv().await? {
                LauncherEvent::InstanceStatusChanged { status, .. } => return Some(status),
                _ => continue,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<InstanceStatus> {
        loop {
            match self.inner.try_recv()? {
                LauncherEvent::InstanceStatusChanged { status, .. } => return Some(status),
                _ => continue,
            }
        }
    }
}

/// Handle a launch driver uses to report progress for one instance.
#[derive(Clone)]
pub struct StatusReporter {
    id: String,
    registry: Arc<InstanceStatusRegistry>,
}

impl StatusReporter {
    pub fn new(id: impl Into<String>, registry: Arc<InstanceStatusRegistry>) -> Self {
        Self {
            id: id.into(),
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn report(&self, status: InstanceStatus) {
        self.registry.set_status(&self.id, status);
    }

    pub fn downloading(&self, now: u64, total: u64) {
        self.report(InstanceStatus::Downloading { now, total });
    }

    pub fn failed(&self, details: impl Into<String>) {
        self.report(InstanceStatus::failed(details));
    }
}
