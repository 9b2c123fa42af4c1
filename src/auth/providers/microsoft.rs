use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::auth::device_code::{DeviceCodeGrant, DeviceCodePoll, DeviceCodeSession};
use crate::auth::error::{AuthError, PolicyBlock};
use crate::auth::profile::Profile;
use crate::auth::provider::IdentityProvider;
use crate::auth::token::{GameToken, MicrosoftToken, XboxLiveToken, XboxSecurityToken};

const DEFAULT_DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
const DEFAULT_TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
const DEFAULT_XBOX_LIVE_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const DEFAULT_XSTS_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const DEFAULT_GAME_LOGIN_URL: &str =
    "https://api.minecraftservices.com/authentication/login_with_xbox";
const DEFAULT_PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";
const SCOPE: &str = "XboxLive.signin offline_access";
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const XERR_NO_XBOX_ACCOUNT: u64 = 2148916233;
const XERR_COUNTRY_BAN: u64 = 2148916235;
const XERR_ADULT_VERIFICATION: u64 = 2148916236;
const XERR_ADULT_VERIFICATION_KR: u64 = 2148916237;
const XERR_ADD_TO_FAMILY: u64 = 2148916238;

/// Microsoft / Xbox / game services sign-in over HTTP.
///
/// # Example
/// ```no_run
/// use nolauncher::auth::providers::microsoft::MicrosoftAuth;
///
/// let auth = MicrosoftAuth::new("my-azure-client-id");
/// ```
pub struct MicrosoftAuth {
    client: reqwest::Client,
    client_id: String,
    device_code_url: String,
    token_url: String,
    xbox_live_url: String,
    xsts_url: String,
    game_login_url: String,
    profile_url: String,
}

impl MicrosoftAuth {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            device_code_url: DEFAULT_DEVICE_CODE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            xbox_live_url: DEFAULT_XBOX_LIVE_URL.to_string(),
            xsts_url: DEFAULT_XSTS_URL.to_string(),
            game_login_url: DEFAULT_GAME_LOGIN_URL.to_string(),
            profile_url: DEFAULT_PROFILE_URL.to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_device_code_url(mut self, url: impl Into<String>) -> Self {
        self.device_code_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_xbox_live_url(mut self, url: impl Into<String>) -> Self {
        self.xbox_live_url = url.into();
        self
    }

    pub fn with_xsts_url(mut self, url: impl Into<String>) -> Self {
        self.xsts_url = url.into();
        self
    }

    pub fn with_game_login_url(mut self, url: impl Into<String>) -> Self {
        self.game_login_url = url.into();
        self
    }

    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftAuth {
    async fn request_device_code(&self) -> Result<DeviceCodeGrant, AuthError> {
        let resp = self
            .client
            .post(&self.device_code_url)
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", SCOPE)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("Device code request", &resp));
        }
        let payload: DeviceCodeResponse = resp.json().await?;
        Ok(DeviceCodeGrant {
            verification_url: payload.verification_uri,
            user_code: payload.user_code,
            device_code: payload.device_code,
            interval_secs: payload.interval,
            expires_in_secs: payload.expires_in,
        })
    }

    async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError> {
        if session.is_expired() {
            return Ok(DeviceCodePoll::Expired);
        }
        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", session.device_code.as_str()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            let payload: MicrosoftTokenResponse = resp.json().await?;
            return Ok(DeviceCodePoll::Authorized {
                token: payload.into_token()?,
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(status_error("Device token request", &resp));
        }
        let payload: OAuthErrorResponse = resp.json().await.map_err(|_| {
            AuthError::InvalidResponse(format!(
                "Device token request failed with status {status}"
            ))
        })?;
        match payload.error.as_str() {
            "authorization_pending" => Ok(DeviceCodePoll::Pending {
                interval_secs: session.interval_secs,
            }),
            "slow_down" => Ok(DeviceCodePoll::SlowDown {
                interval_secs: session.interval_secs + 5,
            }),
            "expired_token" => Ok(DeviceCodePoll::Expired),
            "authorization_declined" | "access_denied" => Ok(DeviceCodePoll::AccessDenied),
            other => Err(AuthError::InvalidResponse(format!(
                "Device code error: {other}"
            ))),
        }
    }

    async fn refresh_microsoft_token(
        &self,
        refresh_token: &str,
    ) -> Result<MicrosoftToken, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .header("Cache-Control", "no-store")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", SCOPE),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        if resp.status() == StatusCode::BAD_REQUEST {
            return Err(AuthError::ExpiredOrInvalidGrant);
        }
        if !resp.status().is_success() {
            return Err(status_error("Token refresh", &resp));
        }
        let payload: MicrosoftTokenResponse = resp.json().await?;
        payload.into_token()
    }

    async fn xbox_live(&self, token: &MicrosoftToken) -> Result<XboxLiveToken, AuthError> {
        let body = json!({
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("d={}", token.access_token),
            },
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT",
        });
        let resp = self
            .client
            .post(&self.xbox_live_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("Xbox Live authentication", &resp));
        }
        let payload: XboxTokenResponse = resp.json().await?;
        let user_hash = payload.user_hash()?;
        Ok(XboxLiveToken {
            token: payload.token,
            user_hash,
        })
    }

    async fn xbox_security(&self, token: &XboxLiveToken) -> Result<XboxSecurityToken, AuthError> {
        let body = json!({
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [token.token],
            },
            "RelyingParty": "rp://api.minecraftservices.com/",
            "TokenType": "JWT",
        });
        let resp = self
            .client
            .post(&self.xsts_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            let payload: XstsErrorResponse = resp.json().await.map_err(|_| {
                AuthError::InvalidResponse("XSTS rejection without XErr".to_string())
            })?;
            return Err(map_xsts_error(payload));
        }
        if !status.is_success() {
            return Err(status_error("XSTS authorization", &resp));
        }
        let payload: XboxTokenResponse = resp.json().await?;
        let user_hash = payload.user_hash()?;
        Ok(XboxSecurityToken {
            token: payload.token,
            user_hash,
        })
    }

    async fn game_login(&self, token: &XboxSecurityToken) -> Result<GameToken, AuthError> {
        let resp = self
            .client
            .post(&self.game_login_url)
            .header("Accept", "application/json")
            .json(&json!({ "identityToken": token.identity_token() }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("Game services login", &resp));
        }
        let payload: GameLoginResponse = resp.json().await?;
        Ok(GameToken {
            access_token: payload.access_token,
            username: payload.username,
            expires_at: expiry_from_now(payload.expires_in)?,
        })
    }

    async fn fetch_profile(&self, token: &GameToken) -> Result<Profile, AuthError> {
        let resp = self
            .client
            .get(&self.profile_url)
            .header("Accept", "application/json")
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::ProfileNotFound(body));
        }
        if !resp.status().is_success() {
            return Err(status_error("Profile request", &resp));
        }
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct MicrosoftTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
}

impl MicrosoftTokenResponse {
    fn into_token(self) -> Result<MicrosoftToken, AuthError> {
        Ok(MicrosoftToken {
            expires_at: expiry_from_now(self.expires_in)?,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scope: self.scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XboxTokenResponse {
    token: String,
    display_claims: DisplayClaims,
}

impl XboxTokenResponse {
    fn user_hash(&self) -> Result<String, AuthError> {
        self.display_claims
            .xui
            .first()
            .map(|claim| claim.uhs.clone())
            .ok_or_else(|| AuthError::InvalidResponse("Xbox token missing user hash".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct DisplayClaims {
    xui: Vec<XuiClaim>,
}

#[derive(Debug, Deserialize)]
struct XuiClaim {
    uhs: String,
}

#[derive(Debug, Deserialize)]
struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    xerr: u64,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GameLoginResponse {
    username: String,
    access_token: String,
    expires_in: u64,
}

fn map_xsts_error(payload: XstsErrorResponse) -> AuthError {
    let block = match payload.xerr {
        XERR_NO_XBOX_ACCOUNT => return AuthError::XboxAccountMissing,
        XERR_COUNTRY_BAN => PolicyBlock::CountryBan,
        XERR_ADULT_VERIFICATION | XERR_ADULT_VERIFICATION_KR => {
            PolicyBlock::NeedAdultVerification
        }
        XERR_ADD_TO_FAMILY => PolicyBlock::AddToFamily,
        other => {
            return AuthError::InvalidResponse(format!("XSTS authorization failed: XErr {other}"))
        }
    };
    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| block.default_message().to_string());
    AuthError::policy(block, message)
}

fn expiry_from_now(expires_in: u64) -> Result<DateTime<Utc>, AuthError> {
    i64::try_from(expires_in)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::InvalidResponse(format!("Token lifetime out of range: {expires_in}s"))
        })
}

fn status_error(what: &str, resp: &Response) -> AuthError {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        return AuthError::RateLimited { retry_after_ms };
    }
    if status.is_server_error() {
        return AuthError::ProviderUnavailable(format!("{what} failed with status {status}"));
    }
    AuthError::InvalidResponse(format!("{what} failed with status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsts_codes_map_to_policy_blocks() {
        let cases = [
            (XERR_COUNTRY_BAN, "CountryBan"),
            (XERR_ADULT_VERIFICATION, "NeedAdultVerification"),
            (XERR_ADULT_VERIFICATION_KR, "NeedAdultVerification"),
            (XERR_ADD_TO_FAMILY, "AddToFamily"),
        ];
        for (xerr, status) in cases {
            let error = map_xsts_error(XstsErrorResponse {
                xerr,
                message: None,
            });
            assert_eq!(error.status(), status);
        }
    }

    #[test]
    fn missing_xbox_account_is_a_generic_error() {
        let error = map_xsts_error(XstsErrorResponse {
            xerr: XERR_NO_XBOX_ACCOUNT,
            message: Some(String::new()),
        });
        assert!(matches!(error, AuthError::XboxAccountMissing));
        assert_eq!(error.status(), "error");
    }

    #[test]
    fn token_lifetime_is_bounded() {
        assert!(expiry_from_now(3600).unwrap() > Utc::now());
        assert!(matches!(
            expiry_from_now(u64::MAX),
            Err(AuthError::InvalidResponse(_))
        ));
        assert!(matches!(
            expiry_from_now(i64::MAX as u64),
            Err(AuthError::InvalidResponse(_))
        ));
    }

    #[test]
    fn provider_message_is_kept_verbatim() {
        let error = map_xsts_error(XstsErrorResponse {
            xerr: XERR_COUNTRY_BAN,
            message: Some("not available here".to_string()),
        });
        match error {
            AuthError::Policy { message, .. } => assert_eq!(message, "not available here"),
            other => panic!("expected policy error, got {other:?}"),
        }
    }
}
