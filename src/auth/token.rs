use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Microsoft account token produced by the device-code grant.
///
/// # Example
/// ```no_run
/// use nolauncher::auth::MicrosoftToken;
/// use chrono::Utc;
///
/// let token = MicrosoftToken {
///     access_token: "access".to_string(),
///     refresh_token: Some("refresh".to_string()),
///     expires_at: Utc::now(),
///     scope: Some("XboxLive.signin offline_access".to_string()),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrosoftToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

/// Xbox Live user token (identity stage output).
#[derive(Debug, Clone)]
pub struct XboxLiveToken {
    pub token: String,
    pub user_hash: String,
}

/// Xbox XSTS token scoped to the game services relying party.
#[derive(Debug, Clone)]
pub struct XboxSecurityToken {
    pub token: String,
    pub user_hash: String,
}

impl XboxSecurityToken {
    /// Identity token header value expected by the game services login.
    pub fn identity_token(&self) -> String {
        format!("XBL3.0 x={};{}", self.user_hash, self.token)
    }
}

/// Game services bearer token (derived stage output).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameToken {
    pub access_token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl GameToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
