use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nolauncher::events::{EventBus, LauncherEvent, Topic};
use nolauncher::instance::{
    CreateInstanceRequest, InstanceLauncher, InstanceStatus, InstanceStatusRegistry,
    InstanceStore, LaunchDriver, LaunchError, LaunchOutcome, LaunchRequest, PlatformType,
    StatusReporter,
};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Fails the first run, then downloads and finishes cleanly.
#[derive(Default)]
struct FlakyDriver {
    runs: AtomicUsize,
}

#[async_trait]
impl LaunchDriver for FlakyDriver {
    async fn launch(
        &self,
        _request: LaunchRequest,
        reporter: StatusReporter,
    ) -> Result<(), LaunchError> {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(LaunchError::Exited {
                status: Some(1),
                signal: None,
            });
        }
        reporter.report(InstanceStatus::Checking);
        reporter.downloading(1, 2);
        reporter.downloading(2, 2);
        reporter.report(InstanceStatus::Running);
        reporter.report(InstanceStatus::Stopped);
        Ok(())
    }
}

fn launch_request(store: &InstanceStore, name: &str) -> LaunchRequest {
    let instance = store
        .create(CreateInstanceRequest {
            name: name.to_string(),
            ptype: PlatformType::Minecraft,
            version: "1.20.1".to_string(),
            mod_version: None,
        })
        .unwrap();
    LaunchRequest {
        directory: store.dir(&instance.id),
        instance,
        account: None,
    }
}

#[test]
fn unknown_instances_read_stopped() {
    let registry = InstanceStatusRegistry::new(EventBus::default());
    assert_eq!(registry.get_status("never-seen"), InstanceStatus::Stopped);
    assert!(registry.can_start("never-seen"));
    assert!(registry.snapshot().is_empty());
}

#[tokio::test]
async fn status_updates_reach_only_their_instance() {
    let bus = EventBus::default();
    let registry = InstanceStatusRegistry::new(bus.clone());
    let mut first = registry.subscribe("a");
    let mut progress = registry.subscribe_progress("a");

    registry.set_status("b", InstanceStatus::Running);
    registry.set_status("a", InstanceStatus::Downloading { now: 3, total: 10 });

    assert_eq!(
        first.next().await,
        Some(InstanceStatus::Downloading { now: 3, total: 10 })
    );
    assert_eq!(first.try_next(), None);

    let event = progress.recv().await.unwrap();
    assert_eq!(event.topic(), Topic::progress("a"));
    assert_eq!(event.payload(), json!({"now": 3, "total": 10}));
}

#[test]
fn dropping_subscriptions_releases_topics() {
    let bus = EventBus::default();
    let registry = InstanceStatusRegistry::new(bus.clone());
    let first = registry.subscribe("a");
    let second = registry.subscribe("a");
    assert_eq!(bus.subscriber_count(&Topic::instance_status("a")), 2);

    drop(first);
    assert_eq!(bus.topic_count(), 1);
    drop(second);
    assert_eq!(bus.topic_count(), 0);

    // Publishing with nobody listening is a no-op.
    registry.set_status("a", InstanceStatus::Running);
    assert_eq!(registry.get_status("a"), InstanceStatus::Running);
}

#[tokio::test]
async fn failed_instance_can_be_launched_again() {
    let dir = tempfile::tempdir().unwrap();
    let store = InstanceStore::new(dir.path());
    let request = launch_request(&store, "Survival");
    let id = request.instance.id.clone();

    let bus = EventBus::default();
    let registry = Arc::new(InstanceStatusRegistry::new(bus.clone()));
    let launcher = InstanceLauncher::new(registry.clone(), Arc::new(FlakyDriver::default()));

    assert_eq!(launcher.launch(request.clone()), LaunchOutcome::Started);
    launcher.wait(&id).await;
    assert_eq!(
        registry.get_status(&id),
        InstanceStatus::failed("status:Some(1) signal:None")
    );

    let mut updates = bus.subscribe(Topic::instance_status(&id));
    assert_eq!(launcher.retry_launch(request), LaunchOutcome::Started);
    launcher.wait(&id).await;

    let mut seen = Vec::new();
    while let Some(LauncherEvent::InstanceStatusChanged { status, .. }) = updates.try_recv() {
        seen.push(status.name());
    }
    assert_eq!(
        seen,
        vec!["Preparing", "Checking", "Downloading", "Downloading", "Running", "Stopped"]
    );
}

#[tokio::test]
async fn active_instance_ignores_second_launch() {
    let dir = tempfile::tempdir().unwrap();
    let store = InstanceStore::new(dir.path());
    let request = launch_request(&store, "Creative");
    let id = request.instance.id.clone();

    let registry = Arc::new(InstanceStatusRegistry::new(EventBus::default()));
    registry.set_status(&id, InstanceStatus::Running);
    let launcher = InstanceLauncher::new(registry.clone(), Arc::new(FlakyDriver::default()));

    assert_eq!(launcher.launch(request), LaunchOutcome::AlreadyActive);
    assert_eq!(registry.get_status(&id), InstanceStatus::Running);
}

#[test]
fn loader_instances_record_both_versions() {
    let dir = tempfile::tempdir().unwrap();
    let store = InstanceStore::new(dir.path());
    let created = store
        .create(CreateInstanceRequest {
            name: "Modded".to_string(),
            ptype: PlatformType::Fabric,
            version: "1.20.1".to_string(),
            mod_version: Some("0.15.7".to_string()),
        })
        .unwrap();

    assert_eq!(created.id.len(), 12);
    assert_eq!(created.top, "net.fabricmc.fabric-loader");
    assert_eq!(created.game_version(), Some("1.20.1"));
    assert_eq!(
        created.dep.get("net.fabricmc.fabric-loader").map(String::as_str),
        Some("0.15.7")
    );
    assert_eq!(store.get(&created.id).unwrap(), created);
}
