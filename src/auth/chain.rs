//! Sign-in chain: device code → Xbox Live → XSTS → game services → profile.
//!
//! One [`AuthChainRunner`] owns one sign-in attempt. Every issued device code
//! bumps the attempt's generation; results produced under an older generation
//! are discarded. Provider calls, refreshes and stage calls are serialized by
//! a single async exchange lock, so at most one of them is in flight.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device_code::{DeviceCodePoll, DeviceCodeSession};
use super::error::AuthError;
use super::provider::IdentityProvider;
use super::token::{MicrosoftToken, XboxLiveToken, XboxSecurityToken};
use crate::accounts::Account;
use crate::events::{EventBus, LauncherEvent, Subscription, Topic};
use crate::util::with_timeout;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest wait before a code is re-issued, whatever lifetime it came with.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Public view of where an attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AuthStage {
    AwaitingDeviceCode,
    PollingUserAuthorization,
    ExchangingIdentityToken,
    ExchangingFederatedToken,
    ExchangingDerivedToken,
    FetchingProfile,
    Complete,
    Failed,
}

impl AuthStage {
    pub fn description(&self) -> &'static str {
        match self {
            Self::AwaitingDeviceCode => "Requesting a device code",
            Self::PollingUserAuthorization => "Waiting for the user to enter the code",
            Self::ExchangingIdentityToken => "Signing in to Xbox Live",
            Self::ExchangingFederatedToken => "Authorizing with Xbox security services",
            Self::ExchangingDerivedToken => "Logging in to game services",
            Self::FetchingProfile => "Fetching the game profile",
            Self::Complete => "Signed in",
            Self::Failed => "Sign-in failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why an attempt ended in [`AuthStage::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFailure {
    /// Stage that was running when the failure happened.
    pub stage: AuthStage,
    /// `error` or the provider policy name.
    pub status: String,
    pub error: String,
}

impl ChainFailure {
    fn new(stage: AuthStage, error: &AuthError) -> Self {
        Self {
            stage,
            status: error.status().to_string(),
            error: error.detail(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Upper bound for each provider call.
    pub call_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Result of one `exchange()` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Not authorized yet. Poll again after `second` seconds.
    Pending { second: u64 },
    Success,
}

enum ChainState {
    AwaitingDeviceCode,
    Polling {
        session: DeviceCodeSession,
    },
    ExchangingIdentityToken {
        msa: MicrosoftToken,
    },
    ExchangingFederatedToken {
        msa: MicrosoftToken,
        live: XboxLiveToken,
    },
    ExchangingDerivedToken {
        msa: MicrosoftToken,
        xsts: XboxSecurityToken,
    },
    FetchingProfile,
    Complete {
        account: Account,
    },
    Failed {
        failure: ChainFailure,
        error: AuthError,
    },
}

impl ChainState {
    fn stage(&self) -> AuthStage {
        match self {
            Self::AwaitingDeviceCode => AuthStage::AwaitingDeviceCode,
            Self::Polling { .. } => AuthStage::PollingUserAuthorization,
            Self::ExchangingIdentityToken { .. } => AuthStage::ExchangingIdentityToken,
            Self::ExchangingFederatedToken { .. } => AuthStage::ExchangingFederatedToken,
            Self::ExchangingDerivedToken { .. } => AuthStage::ExchangingDerivedToken,
            Self::FetchingProfile => AuthStage::FetchingProfile,
            Self::Complete { .. } => AuthStage::Complete,
            Self::Failed { .. } => AuthStage::Failed,
        }
    }
}

enum PollStep {
    Wait(Duration),
    Authorized,
    Expired,
}

struct Inner {
    attempt_id: Uuid,
    provider: Arc<dyn IdentityProvider>,
    bus: EventBus,
    config: AuthConfig,
    state: Mutex<ChainState>,
    generation: watch::Sender<u64>,
    exchange_lock: tokio::sync::Mutex<()>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timer = self
            .refresh_timer
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

/// Drives one sign-in attempt through every stage of the chain.
///
/// Cloning is cheap; all clones share the attempt.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use nolauncher::auth::{AuthChainRunner, AuthConfig};
/// use nolauncher::auth::providers::MicrosoftAuth;
/// use nolauncher::events::EventBus;
///
/// # async fn example() -> Result<(), nolauncher::auth::AuthError> {
/// let runner = AuthChainRunner::new(
///     Arc::new(MicrosoftAuth::new("client-id")),
///     EventBus::default(),
///     AuthConfig::default(),
/// );
/// let session = runner.request_new_code().await?;
/// println!("Visit {} and enter {}", session.verification_url, session.user_code);
/// let account = runner.run().await?;
/// println!("Signed in as {}", account.profile.name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthChainRunner {
    inner: Arc<Inner>,
}

impl AuthChainRunner {
    pub fn new(provider: Arc<dyn IdentityProvider>, bus: EventBus, config: AuthConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                attempt_id: Uuid::new_v4(),
                provider,
                bus,
                config,
                state: Mutex::new(ChainState::AwaitingDeviceCode),
                generation,
                exchange_lock: tokio::sync::Mutex::new(()),
                refresh_timer: Mutex::new(None),
            }),
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.inner.attempt_id
    }

    pub fn stage(&self) -> AuthStage {
        self.lock_state().stage()
    }

    /// Generation of the live device code. Zero before the first code.
    pub fn generation(&self) -> u64 {
        *self.inner.generation.borrow()
    }

    /// The live device code, while the attempt is polling.
    pub fn session(&self) -> Option<DeviceCodeSession> {
        match &*self.lock_state() {
            ChainState::Polling { session } => Some(session.clone()),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<ChainFailure> {
        match &*self.lock_state() {
            ChainState::Failed { failure, .. } => Some(failure.clone()),
            _ => None,
        }
    }

    pub fn account(&self) -> Option<Account> {
        match &*self.lock_state() {
            ChainState::Complete { account } => Some(account.clone()),
            _ => None,
        }
    }

    pub fn subscribe_progress(&self) -> Subscription {
        self.inner.bus.subscribe(Topic::auth_progress(self.inner.attempt_id))
    }

    pub fn subscribe_device_codes(&self) -> Subscription {
        self.inner.bus.subscribe(Topic::device_code(self.inner.attempt_id))
    }

    /// Request a fresh device code, replacing any previous one.
    ///
    /// Allowed before authorization only. The previous code's refresh timer is
    /// cancelled and a pending poll wait resumes against the new code.
    pub async fn request_new_code(&self) -> Result<DeviceCodeSession, AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        self.issue_code_locked().await
    }

    /// Skip the device code: sign in again from a stored refresh token.
    ///
    /// On success the attempt continues at the identity stage.
    pub async fn resume(&self, refresh_token: &str) -> Result<(), AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let stage = self.stage();
        if stage != AuthStage::AwaitingDeviceCode {
            return Err(AuthError::InvalidStage {
                expected: AuthStage::AwaitingDeviceCode,
                found: stage,
            });
        }
        let generation = self.generation();
        let result = self
            .call(self.inner.provider.refresh_microsoft_token(refresh_token))
            .await;
        let mut msa = self.stage_result(AuthStage::AwaitingDeviceCode, generation, result)?;
        if msa.refresh_token.is_none() {
            msa.refresh_token = Some(refresh_token.to_string());
        }
        self.transition(ChainState::ExchangingIdentityToken { msa });
        Ok(())
    }

    /// Manual re-issue of the device code while polling.
    pub async fn refresh(&self) -> Result<DeviceCodeSession, AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let stage = self.stage();
        if stage != AuthStage::PollingUserAuthorization {
            return Err(AuthError::InvalidStage {
                expected: AuthStage::PollingUserAuthorization,
                found: stage,
            });
        }
        self.issue_code_locked().await
    }

    /// Poll the token endpoint once with the live device code.
    ///
    /// Transient provider failures and stale results report `Pending` so the
    /// caller keeps its cadence. An expired code is replaced on the spot.
    pub async fn exchange(&self) -> Result<ExchangeOutcome, AuthError> {
        match self.poll_once().await? {
            PollStep::Authorized => Ok(ExchangeOutcome::Success),
            PollStep::Wait(wait) => Ok(ExchangeOutcome::Pending {
                second: wait.as_secs(),
            }),
            PollStep::Expired => {
                let session = self.replace_expired_code().await?;
                Ok(ExchangeOutcome::Pending {
                    second: session.interval_secs,
                })
            }
        }
    }

    /// Identity stage: Microsoft token → Xbox Live user token.
    pub async fn xbox_live(&self) -> Result<(), AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let msa = match &*self.lock_state() {
            ChainState::ExchangingIdentityToken { msa } => msa.clone(),
            other => return Err(invalid_stage(AuthStage::ExchangingIdentityToken, other)),
        };
        let generation = self.generation();
        let result = self.call(self.inner.provider.xbox_live(&msa)).await;
        let live = self.stage_result(AuthStage::ExchangingIdentityToken, generation, result)?;
        self.transition(ChainState::ExchangingFederatedToken { msa, live });
        Ok(())
    }

    /// Federated stage: Xbox Live token → XSTS token.
    pub async fn xbox_security(&self) -> Result<(), AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let (msa, live) = match &*self.lock_state() {
            ChainState::ExchangingFederatedToken { msa, live } => (msa.clone(), live.clone()),
            other => return Err(invalid_stage(AuthStage::ExchangingFederatedToken, other)),
        };
        let generation = self.generation();
        let result = self.call(self.inner.provider.xbox_security(&live)).await;
        let xsts = self.stage_result(AuthStage::ExchangingFederatedToken, generation, result)?;
        self.transition(ChainState::ExchangingDerivedToken { msa, xsts });
        Ok(())
    }

    /// Derived and profile stages: XSTS token → game token → profile.
    pub async fn finish(&self) -> Result<Account, AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let (msa, xsts) = match &*self.lock_state() {
            ChainState::ExchangingDerivedToken { msa, xsts } => (msa.clone(), xsts.clone()),
            other => return Err(invalid_stage(AuthStage::ExchangingDerivedToken, other)),
        };
        let generation = self.generation();

        let result = self.call(self.inner.provider.game_login(&xsts)).await;
        let game = self.stage_result(AuthStage::ExchangingDerivedToken, generation, result)?;
        self.transition(ChainState::FetchingProfile);

        let result = self.call(self.inner.provider.fetch_profile(&game)).await;
        let profile = self.stage_result(AuthStage::FetchingProfile, generation, result)?;
        let account = Account::new(profile, game, msa.refresh_token);
        self.transition(ChainState::Complete {
            account: account.clone(),
        });
        Ok(account)
    }

    /// Drive the attempt to completion.
    ///
    /// Requests a code if none was issued yet (and the attempt was not
    /// resumed), polls at the provider's cadence, then runs the remaining
    /// stages in order.
    pub async fn run(&self) -> Result<Account, AuthError> {
        if self.stage() == AuthStage::AwaitingDeviceCode {
            self.request_new_code().await?;
        }
        self.poll_until_authorized().await?;
        self.xbox_live().await?;
        self.xbox_security().await?;
        self.finish().await
    }

    /// Abandon the attempt. In-flight calls complete but their results are
    /// discarded.
    pub fn cancel(&self) {
        let stage = self.stage();
        if !stage.is_terminal() {
            self.fail(stage, AuthError::Cancelled);
        }
    }

    async fn poll_until_authorized(&self) -> Result<(), AuthError> {
        let mut generations = self.inner.generation.subscribe();
        let mut next_poll = Instant::now();
        loop {
            generations.borrow_and_update();
            let deadline = match &*self.lock_state() {
                ChainState::Polling { session } => session.deadline(),
                ChainState::Failed { error, .. } => return Err(error.clone()),
                ChainState::AwaitingDeviceCode => {
                    return Err(AuthError::InvalidStage {
                        expected: AuthStage::PollingUserAuthorization,
                        found: AuthStage::AwaitingDeviceCode,
                    })
                }
                _ => return Ok(()),
            };

            if next_poll >= deadline {
                // The code dies before the next allowed poll; wait for its replacement.
                if generations.changed().await.is_err() {
                    return Err(AuthError::Cancelled);
                }
                continue;
            }

            tokio::select! {
                _ = sleep_until(next_poll) => {}
                changed = generations.changed() => {
                    if changed.is_err() {
                        return Err(AuthError::Cancelled);
                    }
                    continue;
                }
            }

            let polled_at = Instant::now();
            match self.poll_once().await? {
                PollStep::Authorized => return Ok(()),
                PollStep::Wait(wait) => next_poll = polled_at + wait,
                PollStep::Expired => {
                    let session = self.replace_expired_code().await?;
                    next_poll = polled_at + session.poll_interval();
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<PollStep, AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        let session = match &*self.lock_state() {
            ChainState::Polling { session } => session.clone(),
            other => return Err(invalid_stage(AuthStage::PollingUserAuthorization, other)),
        };

        let result = self.call(self.inner.provider.poll_device_code(&session)).await;
        if self.generation() != session.generation {
            debug!(
                attempt = %self.inner.attempt_id,
                generation = session.generation,
                "Discarding poll result for a superseded device code"
            );
            if let ChainState::Failed { error, .. } = &*self.lock_state() {
                return Err(error.clone());
            }
            return Ok(PollStep::Wait(session.poll_interval()));
        }

        match result {
            Ok(DeviceCodePoll::Pending { interval_secs }) => {
                Ok(PollStep::Wait(Duration::from_secs(interval_secs)))
            }
            Ok(DeviceCodePoll::SlowDown { interval_secs }) => {
                let interval_secs = interval_secs.max(session.interval_secs);
                if let ChainState::Polling { session } = &mut *self.lock_state() {
                    session.interval_secs = interval_secs;
                }
                debug!(attempt = %self.inner.attempt_id, interval_secs, "Provider asked to slow down");
                Ok(PollStep::Wait(Duration::from_secs(interval_secs)))
            }
            Ok(DeviceCodePoll::Authorized { token }) => {
                self.cancel_refresh_timer();
                self.transition(ChainState::ExchangingIdentityToken { msa: token });
                Ok(PollStep::Authorized)
            }
            Ok(DeviceCodePoll::Expired) => Ok(PollStep::Expired),
            Ok(DeviceCodePoll::AccessDenied) => {
                let error = AuthError::AccessDenied;
                self.fail(AuthStage::PollingUserAuthorization, error.clone());
                Err(error)
            }
            Err(error) if error.is_transient() => {
                let wait = error
                    .retry_after()
                    .map_or(session.poll_interval(), |after| {
                        after.max(session.poll_interval())
                    });
                warn!(
                    attempt = %self.inner.attempt_id,
                    error = %error,
                    wait_ms = wait.as_millis() as u64,
                    "Transient poll failure, retrying at cadence"
                );
                Ok(PollStep::Wait(wait))
            }
            Err(error) => {
                self.fail(AuthStage::PollingUserAuthorization, error.clone());
                Err(error)
            }
        }
    }

    async fn replace_expired_code(&self) -> Result<DeviceCodeSession, AuthError> {
        let _guard = self.inner.exchange_lock.lock().await;
        if let Some(session) = self.session() {
            if !session.is_expired() {
                // Someone else already replaced it.
                return Ok(session);
            }
        }
        self.issue_code_locked().await.inspect_err(|error| {
            self.fail(AuthStage::PollingUserAuthorization, error.clone());
        })
    }

    async fn refresh_on_timer(&self, generation: u64) {
        let _guard = self.inner.exchange_lock.lock().await;
        if self.generation() != generation
            || self.stage() != AuthStage::PollingUserAuthorization
        {
            debug!(attempt = %self.inner.attempt_id, generation, "Ignoring stale refresh timer");
            return;
        }
        // Detach this task's own handle so re-arming does not abort it.
        drop(self.lock_timer().take());
        info!(attempt = %self.inner.attempt_id, generation, "Device code expired, refreshing");
        if let Err(error) = self.issue_code_locked().await {
            self.fail(AuthStage::PollingUserAuthorization, error);
        }
    }

    /// Caller must hold the exchange lock.
    async fn issue_code_locked(&self) -> Result<DeviceCodeSession, AuthError> {
        let stage = self.stage();
        if !matches!(
            stage,
            AuthStage::AwaitingDeviceCode | AuthStage::PollingUserAuthorization
        ) {
            return Err(AuthError::InvalidStage {
                expected: AuthStage::PollingUserAuthorization,
                found: stage,
            });
        }
        let dispatched = self.generation();
        let grant = self.call(self.inner.provider.request_device_code()).await?;

        let session = {
            let mut state = self.lock_state();
            if self.generation() != dispatched || state.stage().is_terminal() {
                return Err(AuthError::Cancelled);
            }
            let session = DeviceCodeSession::from_grant(grant, dispatched + 1);
            let from = state.stage();
            *state = ChainState::Polling {
                session: session.clone(),
            };
            self.inner.generation.send_modify(|generation| *generation += 1);
            drop(state);
            if from != AuthStage::PollingUserAuthorization {
                self.announce(from, AuthStage::PollingUserAuthorization);
            }
            session
        };

        self.arm_refresh_timer(&session);
        info!(
            attempt = %self.inner.attempt_id,
            generation = session.generation,
            expires_in_secs = session.expires_in().as_secs(),
            "Issued device code"
        );
        self.inner.bus.publish(LauncherEvent::DeviceCodeIssued {
            attempt: self.inner.attempt_id,
            generation: session.generation,
            url: session.verification_url.clone(),
            code: session.user_code.clone(),
            expiring_in: session.expires_in(),
        });
        Ok(session)
    }

    fn arm_refresh_timer(&self, session: &DeviceCodeSession) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let generation = session.generation;
        let floor = Instant::now() + session.poll_interval().max(MIN_REFRESH_DELAY);
        let deadline = session.deadline().max(floor);
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            AuthChainRunner { inner }.refresh_on_timer(generation).await;
        });
        if let Some(previous) = self.lock_timer().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_refresh_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
    }

    async fn call<T>(
        &self,
        future: impl std::future::Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        with_timeout(self.inner.config.call_timeout, future).await
    }

    /// Apply a stage call's result: fail the chain on error, drop it if the
    /// attempt moved on while the call was in flight.
    fn stage_result<T>(
        &self,
        stage: AuthStage,
        generation: u64,
        result: Result<T, AuthError>,
    ) -> Result<T, AuthError> {
        if self.generation() != generation {
            debug!(attempt = %self.inner.attempt_id, stage = %stage, "Discarding stale stage result");
            return Err(match &*self.lock_state() {
                ChainState::Failed { error, .. } => error.clone(),
                _ => AuthError::Cancelled,
            });
        }
        result.inspect_err(|error| self.fail(stage, error.clone()))
    }

    fn transition(&self, next: ChainState) {
        let (from, to) = {
            let mut state = self.lock_state();
            if state.stage().is_terminal() {
                return;
            }
            let from = state.stage();
            *state = next;
            (from, state.stage())
        };
        if from != to {
            self.announce(from, to);
        }
    }

    fn announce(&self, from: AuthStage, to: AuthStage) {
        info!(attempt = %self.inner.attempt_id, from = %from, to = %to, "Auth stage advanced");
        self.inner.bus.publish(LauncherEvent::AuthProgress {
            attempt: self.inner.attempt_id,
            stage: to,
            message: to.description().to_string(),
            failure: None,
        });
    }

    fn fail(&self, stage: AuthStage, error: AuthError) {
        let failure = ChainFailure::new(stage, &error);
        {
            let mut state = self.lock_state();
            if state.stage().is_terminal() {
                return;
            }
            *state = ChainState::Failed {
                failure: failure.clone(),
                error,
            };
            self.inner.generation.send_modify(|generation| *generation += 1);
        }
        self.cancel_refresh_timer();
        warn!(
            attempt = %self.inner.attempt_id,
            stage = %failure.stage,
            status = %failure.status,
            error = %failure.error,
            "Sign-in failed"
        );
        self.inner.bus.publish(LauncherEvent::AuthProgress {
            attempt: self.inner.attempt_id,
            stage: AuthStage::Failed,
            message: format!("{} failed: {}", failure.stage.description(), failure.error),
            failure: Some(failure),
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .refresh_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

fn invalid_stage(expected: AuthStage, state: &ChainState) -> AuthError {
    AuthError::InvalidStage {
        expected,
        found: state.stage(),
    }
}
