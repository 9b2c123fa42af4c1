//! Named operations the UI calls, with serializable inputs, outputs and errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::accounts::{Account, AccountStore};
use crate::auth::providers::MicrosoftAuth;
use crate::auth::{
    AuthChainRunner, AuthConfig, AuthError, DeviceCodeSession, ExchangeOutcome, IdentityProvider,
    Profile,
};
use crate::config::LauncherConfig;
use crate::error::LauncherError;
use crate::events::{EventBus, Subscription, Topic};
use crate::instance::{
    CommandLaunchDriver, CreateInstanceRequest, InstanceLauncher, InstanceStatus,
    InstanceStatusRegistry, InstanceStore, InstanceSummary, LaunchDriver, LaunchOutcome,
    LaunchRequest,
};

/// Error payload returned by every gateway operation.
///
/// `status` is `error` or the provider policy that blocked sign-in
/// (`CountryBan`, `NeedAdultVerification`, `AddToFamily`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{status}: {error}")]
pub struct CommandError {
    pub status: String,
    pub error: String,
}

impl CommandError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: error.into(),
        }
    }
}

impl From<AuthError> for CommandError {
    fn from(error: AuthError) -> Self {
        Self {
            status: error.status().to_string(),
            error: error.detail(),
        }
    }
}

impl From<LauncherError> for CommandError {
    fn from(error: LauncherError) -> Self {
        match error {
            LauncherError::Auth(error) => error.into(),
            other => Self::new(other.to_string()),
        }
    }
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Device code as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicecodeInfo {
    pub url: String,
    pub code: String,
    pub expiring_in: Duration,
}

impl From<&DeviceCodeSession> for DevicecodeInfo {
    fn from(session: &DeviceCodeSession) -> Self {
        Self {
            url: session.verification_url.clone(),
            code: session.user_code.clone(),
            expiring_in: session.expires_in(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeAction {
    Pending,
    Success,
}

/// `exchange()` result. `second` is the wait before the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub action: ExchangeAction,
    pub second: u64,
}

impl From<ExchangeOutcome> for ExchangeStatus {
    fn from(outcome: ExchangeOutcome) -> Self {
        match outcome {
            ExchangeOutcome::Pending { second } => Self {
                action: ExchangeAction::Pending,
                second,
            },
            ExchangeOutcome::Success => Self {
                action: ExchangeAction::Success,
                second: 0,
            },
        }
    }
}

/// The backend boundary: sign-in, users and instances.
pub struct CommandGateway {
    provider: Arc<dyn IdentityProvider>,
    auth_config: AuthConfig,
    bus: EventBus,
    accounts: AccountStore,
    instances: InstanceStore,
    registry: Arc<InstanceStatusRegistry>,
    launcher: InstanceLauncher,
    attempt: Mutex<Option<AuthChainRunner>>,
}

impl CommandGateway {
    /// Wire the gateway from configuration with the real identity provider
    /// and the process launch driver.
    pub fn from_config(config: &LauncherConfig) -> crate::error::Result<Self> {
        let provider = MicrosoftAuth::new(config.client_id()?);
        let driver = CommandLaunchDriver::new(
            config.launch_program.clone(),
            config.launch_args.clone(),
        );
        Self::new(config, Arc::new(provider), Arc::new(driver))
    }

    pub fn new(
        config: &LauncherConfig,
        provider: Arc<dyn IdentityProvider>,
        driver: Arc<dyn LaunchDriver>,
    ) -> crate::error::Result<Self> {
        let bus = EventBus::new(config.event_capacity);
        let accounts = AccountStore::open(config.accounts_path(), bus.clone())?;
        let registry = Arc::new(InstanceStatusRegistry::new(bus.clone()));
        Ok(Self {
            provider,
            auth_config: AuthConfig {
                call_timeout: config.call_timeout(),
            },
            launcher: InstanceLauncher::new(registry.clone(), driver),
            instances: InstanceStore::new(config.instances_dir()),
            bus,
            accounts,
            registry,
            attempt: Mutex::new(None),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.bus.subscribe(topic)
    }

    pub fn registry(&self) -> &Arc<InstanceStatusRegistry> {
        &self.registry
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn launcher(&self) -> &InstanceLauncher {
        &self.launcher
    }

    /// The sign-in attempt in progress, if any.
    pub fn attempt(&self) -> Option<AuthChainRunner> {
        self.attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current device code. A still-valid code of the live attempt is reused;
    /// otherwise a new attempt starts and the old one is cancelled.
    pub async fn devicecode(&self) -> CommandResult<DevicecodeInfo> {
        if let Some(session) = self.attempt().and_then(|runner| runner.session()) {
            if !session.is_expired() {
                return Ok(DevicecodeInfo::from(&session));
            }
        }

        let runner = self.start_attempt();
        let session = runner.request_new_code().await?;
        Ok(DevicecodeInfo::from(&session))
    }

    /// Re-issue the device code of the live attempt.
    pub async fn refresh(&self) -> CommandResult<DevicecodeInfo> {
        let session = self.live_attempt()?.refresh().await?;
        Ok(DevicecodeInfo::from(&session))
    }

    pub async fn exchange(&self) -> CommandResult<ExchangeStatus> {
        Ok(self.live_attempt()?.exchange().await?.into())
    }

    pub async fn xbox_live(&self) -> CommandResult<()> {
        Ok(self.live_attempt()?.xbox_live().await?)
    }

    pub async fn xbox_security(&self) -> CommandResult<()> {
        Ok(self.live_attempt()?.xbox_security().await?)
    }

    /// Finish sign-in and store the account. The first account becomes the
    /// current user.
    pub async fn account(&self) -> CommandResult<Profile> {
        let runner = self.live_attempt()?;
        let account = runner.finish().await?;
        self.store_account(account.clone())?;
        self.clear_attempt(&runner);
        Ok(account.profile)
    }

    /// Drive the live attempt to completion without step-wise calls and
    /// store the account.
    pub async fn sign_in(&self) -> CommandResult<Profile> {
        let runner = self.live_attempt()?;
        let account = runner.run().await?;
        self.store_account(account.clone())?;
        self.clear_attempt(&runner);
        Ok(account.profile)
    }

    /// Sign an account in again from its stored refresh token.
    pub async fn refresh_account(&self, id: &str) -> CommandResult<Profile> {
        let stored = self
            .accounts
            .get(id)
            .ok_or_else(|| LauncherError::AccountNotFound(id.to_string()))?;
        let refresh_token = stored
            .refresh_token
            .ok_or_else(|| CommandError::new(format!("Account {id} has no refresh token")))?;

        let runner = AuthChainRunner::new(
            self.provider.clone(),
            self.bus.clone(),
            self.auth_config.clone(),
        );
        runner.resume(&refresh_token).await?;
        let account = runner.run().await?;
        self.accounts.add(account.clone())?;
        Ok(account.profile)
    }

    pub fn get_users(&self) -> Vec<Profile> {
        self.accounts.profiles()
    }

    pub fn get_current_user(&self) -> CommandResult<String> {
        self.accounts
            .current()
            .ok_or_else(|| CommandError::new("No active user"))
    }

    pub fn set_current_user(&self, id: &str) -> CommandResult<()> {
        Ok(self.accounts.set_current(id)?)
    }

    pub fn logout_user(&self, id: &str) -> CommandResult<()> {
        Ok(self.accounts.logout(id)?)
    }

    pub fn list_instance(&self) -> CommandResult<Vec<InstanceSummary>> {
        Ok(self.instances.list()?)
    }

    pub fn create_instance(&self, request: CreateInstanceRequest) -> CommandResult<InstanceSummary> {
        let config = self.instances.create(request)?;
        Ok(InstanceSummary {
            id: config.id,
            name: config.name,
        })
    }

    pub fn get_instance_status(&self, id: &str) -> InstanceStatus {
        self.registry.get_status(id)
    }

    /// Start an instance with the current user's account. Accepted after a
    /// failure; an instance that is already active is left alone.
    pub async fn launch_game(&self, id: &str) -> CommandResult<LaunchOutcome> {
        let instance = self.instances.get(id)?;
        if !self.registry.can_start(&instance.id) {
            info!(instance = %instance.id, "Launch ignored, instance already active");
            return Ok(LaunchOutcome::AlreadyActive);
        }
        let account = self.launch_account().await;
        Ok(self.launcher.launch(LaunchRequest {
            directory: self.instances.dir(&instance.id),
            instance,
            account,
        }))
    }

    /// Current account, refreshed first if its game token expired. A failed
    /// refresh launches with the stale account.
    async fn launch_account(&self) -> Option<Account> {
        let account = self.accounts.current_account()?;
        if !account.needs_refresh() || account.refresh_token.is_none() {
            return Some(account);
        }
        match self.refresh_account(account.id()).await {
            Ok(_) => self.accounts.get(account.id()),
            Err(error) => {
                warn!(user = %account.id(), error = %error, "Account refresh failed");
                Some(account)
            }
        }
    }

    fn start_attempt(&self) -> AuthChainRunner {
        let runner = AuthChainRunner::new(
            self.provider.clone(),
            self.bus.clone(),
            self.auth_config.clone(),
        );
        let previous = self
            .attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(runner.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        info!(attempt = %runner.attempt_id(), "Started sign-in attempt");
        runner
    }

    fn live_attempt(&self) -> CommandResult<AuthChainRunner> {
        self.attempt()
            .ok_or_else(|| CommandError::new("No sign-in in progress; request a device code first"))
    }

    fn clear_attempt(&self, runner: &AuthChainRunner) {
        let mut attempt = self.attempt.lock().unwrap_or_else(|e| e.into_inner());
        if attempt
            .as_ref()
            .is_some_and(|live| live.attempt_id() == runner.attempt_id())
        {
            *attempt = None;
        }
    }

    fn store_account(&self, account: Account) -> crate::error::Result<()> {
        let id = account.id().to_string();
        self.accounts.add(account)?;
        if self.accounts.current().is_none() {
            self.accounts.set_current(&id)?;
        }
        Ok(())
    }
}

impl Drop for CommandGateway {
    fn drop(&mut self) {
        if let Some(runner) = self.attempt() {
            runner.cancel();
        }
    }
}
