mod auth_support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nolauncher::accounts::Account;
use nolauncher::auth::{AuthError, PolicyBlock};
use nolauncher::events::{LauncherEvent, Topic};
use nolauncher::gateway::{CommandGateway, DevicecodeInfo, ExchangeAction, ExchangeStatus};
use nolauncher::instance::{
    CreateInstanceRequest, InstanceStatus, LaunchDriver, LaunchError, LaunchOutcome,
    LaunchRequest, PlatformType, StatusReporter,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use auth_support::{
    game_token, profile, test_config, PollReply, ScriptedProvider, REFRESH_MICROSOFT_TOKEN,
    REQUEST_DEVICE_CODE, XBOX_SECURITY,
};

#[derive(Default)]
struct RecordingDriver {
    launches: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingDriver {
    fn launches(&self) -> Vec<(String, Option<String>)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl LaunchDriver for RecordingDriver {
    async fn launch(
        &self,
        request: LaunchRequest,
        reporter: StatusReporter,
    ) -> Result<(), LaunchError> {
        self.launches.lock().unwrap().push((
            request.instance.id.clone(),
            request.account.as_ref().map(|a| a.name().to_string()),
        ));
        reporter.report(InstanceStatus::Running);
        reporter.report(InstanceStatus::Stopped);
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    provider: Arc<ScriptedProvider>,
    driver: Arc<RecordingDriver>,
    gateway: CommandGateway,
}

fn harness(provider: ScriptedProvider) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(provider);
    let driver = Arc::new(RecordingDriver::default());
    let gateway =
        CommandGateway::new(&test_config(dir.path()), provider.clone(), driver.clone()).unwrap();
    Harness {
        _dir: dir,
        provider,
        driver,
        gateway,
    }
}

fn pending(second: u64) -> ExchangeStatus {
    ExchangeStatus {
        action: ExchangeAction::Pending,
        second,
    }
}

#[tokio::test(start_paused = true)]
async fn devicecode_is_reused_while_valid() {
    let h = harness(ScriptedProvider::new(5, 900));

    let info = h.gateway.devicecode().await.unwrap();
    assert_eq!(
        serde_json::to_value(&info).unwrap(),
        json!({"url": "https://x", "code": "ABCD", "expiring_in": {"secs": 900, "nanos": 0}})
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    let again = h.gateway.devicecode().await.unwrap();
    assert_eq!(
        again,
        DevicecodeInfo {
            url: "https://x".to_string(),
            code: "ABCD".to_string(),
            expiring_in: Duration::from_secs(870),
        }
    );
    assert_eq!(h.provider.count(REQUEST_DEVICE_CODE), 1);
}

#[tokio::test(start_paused = true)]
async fn step_wise_sign_in_stores_first_account_as_current() {
    let h = harness(ScriptedProvider::new(5, 900).with_polls([
        PollReply::Pending,
        PollReply::Pending,
        PollReply::Pending,
        PollReply::Authorized,
    ]));
    let mut user_changes = h.gateway.subscribe(Topic::change_user());

    h.gateway.devicecode().await.unwrap();
    for _ in 0..3 {
        assert_eq!(h.gateway.exchange().await.unwrap(), pending(5));
    }
    let done = h.gateway.exchange().await.unwrap();
    assert_eq!(
        serde_json::to_value(done).unwrap(),
        json!({"action": "Success", "second": 0})
    );

    h.gateway.xbox_live().await.unwrap();
    h.gateway.xbox_security().await.unwrap();
    let signed_in = h.gateway.account().await.unwrap();

    assert_eq!(signed_in, profile("0f3b9c", "Steve"));
    assert_eq!(h.gateway.get_users(), vec![signed_in.clone()]);
    assert_eq!(h.gateway.get_current_user().unwrap(), "0f3b9c");
    assert!(h.gateway.attempt().is_none());
    assert_eq!(h.provider.count(REQUEST_DEVICE_CODE), 1);
    assert_eq!(
        user_changes.try_recv(),
        Some(LauncherEvent::ChangeUser {
            uuid: Some("0f3b9c".to_string())
        })
    );
}

#[tokio::test(start_paused = true)]
async fn policy_block_surfaces_in_error_payload() {
    let message = "Xbox Live is not available in your country";
    let h = harness(
        ScriptedProvider::new(5, 900)
            .with_polls([PollReply::Authorized])
            .fail_on(XBOX_SECURITY, AuthError::policy(PolicyBlock::CountryBan, message)),
    );

    h.gateway.devicecode().await.unwrap();
    h.gateway.exchange().await.unwrap();
    h.gateway.xbox_live().await.unwrap();
    let err = h.gateway.xbox_security().await.unwrap_err();
    assert_eq!(
        serde_json::to_value(&err).unwrap(),
        json!({"status": "CountryBan", "error": message})
    );

    let err = h.gateway.account().await.unwrap_err();
    assert_eq!(err.status, "error");
    assert!(h.gateway.get_users().is_empty());

    // A failed attempt needs a fresh device code.
    let info = h.gateway.devicecode().await.unwrap();
    assert_eq!(info.code, "CODE2");
}

#[tokio::test(start_paused = true)]
async fn sign_in_runs_the_whole_chain() {
    let h = harness(
        ScriptedProvider::new(5, 900).with_polls([PollReply::Pending, PollReply::Authorized]),
    );
    h.gateway.devicecode().await.unwrap();
    let signed_in = h.gateway.sign_in().await.unwrap();
    assert_eq!(signed_in.name, "Steve");
    assert_eq!(
        h.gateway.accounts().get("0f3b9c").unwrap().refresh_token.as_deref(),
        Some("refresh-1")
    );
}

#[tokio::test(start_paused = true)]
async fn devicecode_after_cancel_starts_new_attempt() {
    let h = harness(ScriptedProvider::new(5, 900));
    h.gateway.devicecode().await.unwrap();
    let first = h.gateway.attempt().unwrap();
    first.cancel();

    h.gateway.devicecode().await.unwrap();
    let second = h.gateway.attempt().unwrap();
    assert_ne!(first.attempt_id(), second.attempt_id());
    assert_eq!(h.gateway.refresh().await.unwrap().code, "CODE3");
}

#[tokio::test]
async fn step_calls_without_attempt_are_errors() {
    let h = harness(ScriptedProvider::new(5, 900));
    let err = h.gateway.exchange().await.unwrap_err();
    assert_eq!(err.status, "error");
    assert!(err.error.contains("No sign-in in progress"));
}

#[tokio::test]
async fn user_operations_report_generic_errors() {
    let h = harness(ScriptedProvider::new(5, 900));
    assert_eq!(h.gateway.get_current_user().unwrap_err().error, "No active user");

    let err = h.gateway.set_current_user("ghost").unwrap_err();
    assert_eq!(err.status, "error");
    let err = h.gateway.logout_user("ghost").unwrap_err();
    assert_eq!(err.status, "error");
}

#[tokio::test]
async fn create_list_and_launch_instance() {
    let h = harness(ScriptedProvider::new(5, 900));
    let account = Account::new(
        profile("u1", "Alex"),
        game_token(chrono::Duration::hours(1)),
        Some("rt".to_string()),
    );
    h.gateway.accounts().add(account).unwrap();
    h.gateway.set_current_user("u1").unwrap();

    let created = h
        .gateway
        .create_instance(CreateInstanceRequest {
            name: "Vanilla".to_string(),
            ptype: PlatformType::Minecraft,
            version: "1.20.1".to_string(),
            mod_version: None,
        })
        .unwrap();
    assert_eq!(h.gateway.list_instance().unwrap(), vec![created.clone()]);
    assert_eq!(
        h.gateway.get_instance_status(&created.id),
        InstanceStatus::Stopped
    );

    let mut statuses = h.gateway.registry().subscribe(&created.id);
    assert_eq!(
        h.gateway.launch_game(&created.id).await.unwrap(),
        LaunchOutcome::Started
    );
    h.gateway.launcher().wait(&created.id).await;

    assert_eq!(statuses.next().await, Some(InstanceStatus::Preparing));
    assert_eq!(
        h.gateway.get_instance_status(&created.id),
        InstanceStatus::Stopped
    );
    assert_eq!(
        h.driver.launches(),
        vec![(created.id.clone(), Some("Alex".to_string()))]
    );
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn launch_refreshes_expired_account_first() {
    let h = harness(ScriptedProvider::new(5, 900));
    let stale = Account::new(
        profile("0f3b9c", "Steve"),
        game_token(-chrono::Duration::hours(1)),
        Some("stored-refresh".to_string()),
    );
    h.gateway.accounts().add(stale).unwrap();
    h.gateway.set_current_user("0f3b9c").unwrap();

    let created = h
        .gateway
        .create_instance(CreateInstanceRequest {
            name: "Fresh".to_string(),
            ptype: PlatformType::Minecraft,
            version: "1.21".to_string(),
            mod_version: None,
        })
        .unwrap();
    h.gateway.launch_game(&created.id).await.unwrap();
    h.gateway.launcher().wait(&created.id).await;

    assert_eq!(h.provider.count(REFRESH_MICROSOFT_TOKEN), 1);
    let refreshed = h.gateway.accounts().get("0f3b9c").unwrap();
    assert!(!refreshed.needs_refresh());
    assert_eq!(refreshed.refresh_token.as_deref(), Some("stored-refresh"));
}

#[tokio::test]
async fn active_instance_launch_leaves_expired_account_alone() {
    let h = harness(ScriptedProvider::new(5, 900));
    let stale = Account::new(
        profile("0f3b9c", "Steve"),
        game_token(-chrono::Duration::hours(1)),
        Some("stored-refresh".to_string()),
    );
    h.gateway.accounts().add(stale.clone()).unwrap();
    h.gateway.set_current_user("0f3b9c").unwrap();

    let created = h
        .gateway
        .create_instance(CreateInstanceRequest {
            name: "Busy".to_string(),
            ptype: PlatformType::Minecraft,
            version: "1.21".to_string(),
            mod_version: None,
        })
        .unwrap();
    h.gateway
        .registry()
        .set_status(&created.id, InstanceStatus::Running);

    assert_eq!(
        h.gateway.launch_game(&created.id).await.unwrap(),
        LaunchOutcome::AlreadyActive
    );
    assert!(h.provider.calls().is_empty());
    assert!(h.driver.launches().is_empty());
    assert_eq!(h.gateway.accounts().get("0f3b9c"), Some(stale));
    assert_eq!(
        h.gateway.get_instance_status(&created.id),
        InstanceStatus::Running
    );
}

#[tokio::test]
async fn launching_unknown_instance_fails() {
    let h = harness(ScriptedProvider::new(5, 900));
    let err = h.gateway.launch_game("nope").await.unwrap_err();
    assert_eq!(err.error, "Instance not found: nope");
}
