#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nolauncher::auth::{
    AuthError, DeviceCodeGrant, DeviceCodePoll, DeviceCodeSession, GameToken, IdentityProvider,
    MicrosoftToken, Profile, XboxLiveToken, XboxSecurityToken,
};
use nolauncher::config::LauncherConfig;
use tokio::time::Instant;

pub const REQUEST_DEVICE_CODE: &str = "request_device_code";
pub const POLL_DEVICE_CODE: &str = "poll_device_code";
pub const REFRESH_MICROSOFT_TOKEN: &str = "refresh_microsoft_token";
pub const XBOX_LIVE: &str = "xbox_live";
pub const XBOX_SECURITY: &str = "xbox_security";
pub const GAME_LOGIN: &str = "game_login";
pub const FETCH_PROFILE: &str = "fetch_profile";

/// What the scripted token endpoint answers to one poll.
#[derive(Debug, Clone)]
pub enum PollReply {
    Pending,
    /// Asks for the current interval plus five seconds.
    SlowDown,
    Authorized,
    Expired,
    Denied,
    Fail(AuthError),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub op: &'static str,
    /// User code of the session a poll ran against.
    pub user_code: Option<String>,
}

/// In-memory identity provider driven by a poll script.
///
/// Device codes are `ABCD` for the first request and `CODE<n>` afterwards.
/// Once the script runs out every poll is `Pending`.
pub struct ScriptedProvider {
    interval_secs: u64,
    expires_in_secs: u64,
    polls: Mutex<VecDeque<PollReply>>,
    poll_delay: Mutex<Duration>,
    failures: Mutex<HashMap<&'static str, AuthError>>,
    codes: AtomicU64,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedProvider {
    pub fn new(interval_secs: u64, expires_in_secs: u64) -> Self {
        Self {
            interval_secs,
            expires_in_secs,
            polls: Mutex::new(VecDeque::new()),
            poll_delay: Mutex::new(Duration::ZERO),
            failures: Mutex::new(HashMap::new()),
            codes: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_polls(self, replies: impl IntoIterator<Item = PollReply>) -> Self {
        self.polls.lock().unwrap().extend(replies);
        self
    }

    /// Every poll takes `delay` before answering.
    pub fn with_poll_delay(self, delay: Duration) -> Self {
        *self.poll_delay.lock().unwrap() = delay;
        self
    }

    /// Make every call to `op` fail with `error`.
    pub fn fail_on(self, op: &'static str, error: AuthError) -> Self {
        self.failures.lock().unwrap().insert(op, error);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|call| call.op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|call| call.op == op).count()
    }

    /// Poll calls as (time, user code).
    pub fn polls(&self) -> Vec<(Instant, String)> {
        self.calls()
            .into_iter()
            .filter(|call| call.op == POLL_DEVICE_CODE)
            .map(|call| (call.at, call.user_code.unwrap_or_default()))
            .collect()
    }

    fn record(&self, op: &'static str, user_code: Option<String>) -> Result<(), AuthError> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            op,
            user_code,
        });
        match self.failures.lock().unwrap().get(op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn request_device_code(&self) -> Result<DeviceCodeGrant, AuthError> {
        self.record(REQUEST_DEVICE_CODE, None)?;
        let n = self.codes.fetch_add(1, Ordering::SeqCst) + 1;
        let user_code = if n == 1 {
            "ABCD".to_string()
        } else {
            format!("CODE{n}")
        };
        Ok(DeviceCodeGrant {
            verification_url: "https://x".to_string(),
            device_code: format!("device-{n}"),
            user_code,
            interval_secs: self.interval_secs,
            expires_in_secs: self.expires_in_secs,
        })
    }

    async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError> {
        self.record(POLL_DEVICE_CODE, Some(session.user_code.clone()))?;
        let delay = *self.poll_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollReply::Pending);
        match reply {
            PollReply::Pending => Ok(DeviceCodePoll::Pending {
                interval_secs: session.interval_secs,
            }),
            PollReply::SlowDown => Ok(DeviceCodePoll::SlowDown {
                interval_secs: session.interval_secs + 5,
            }),
            PollReply::Authorized => Ok(DeviceCodePoll::Authorized {
                token: microsoft_token(Some("refresh-1")),
            }),
            PollReply::Expired => Ok(DeviceCodePoll::Expired),
            PollReply::Denied => Ok(DeviceCodePoll::AccessDenied),
            PollReply::Fail(error) => Err(error),
        }
    }

    async fn refresh_microsoft_token(
        &self,
        _refresh_token: &str,
    ) -> Result<MicrosoftToken, AuthError> {
        self.record(REFRESH_MICROSOFT_TOKEN, None)?;
        Ok(microsoft_token(None))
    }

    async fn xbox_live(&self, _token: &MicrosoftToken) -> Result<XboxLiveToken, AuthError> {
        self.record(XBOX_LIVE, None)?;
        Ok(XboxLiveToken {
            token: "xbl-token".to_string(),
            user_hash: "uhs".to_string(),
        })
    }

    async fn xbox_security(&self, token: &XboxLiveToken) -> Result<XboxSecurityToken, AuthError> {
        self.record(XBOX_SECURITY, None)?;
        Ok(XboxSecurityToken {
            token: "xsts-token".to_string(),
            user_hash: token.user_hash.clone(),
        })
    }

    async fn game_login(&self, _token: &XboxSecurityToken) -> Result<GameToken, AuthError> {
        self.record(GAME_LOGIN, None)?;
        Ok(game_token(chrono::Duration::hours(24)))
    }

    async fn fetch_profile(&self, _token: &GameToken) -> Result<Profile, AuthError> {
        self.record(FETCH_PROFILE, None)?;
        Ok(profile("0f3b9c", "Steve"))
    }
}

pub fn microsoft_token(refresh_token: Option<&str>) -> MicrosoftToken {
    MicrosoftToken {
        access_token: "msa-token".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        scope: Some("XboxLive.signin offline_access".to_string()),
    }
}

pub fn game_token(valid_for: chrono::Duration) -> GameToken {
    GameToken {
        access_token: "game-token".to_string(),
        username: "Steve".to_string(),
        expires_at: Utc::now() + valid_for,
    }
}

pub fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: id.to_string(),
        name: name.to_string(),
        skins: Vec::new(),
        capes: Vec::new(),
    }
}

pub fn test_config(data_dir: &Path) -> LauncherConfig {
    LauncherConfig::default()
        .with_client_id("test-client")
        .with_data_dir(data_dir)
}
