//! Seam between the sign-in chain and the remote identity services.

use async_trait::async_trait;

use super::device_code::{DeviceCodeGrant, DeviceCodePoll, DeviceCodeSession};
use super::error::AuthError;
use super::profile::Profile;
use super::token::{GameToken, MicrosoftToken, XboxLiveToken, XboxSecurityToken};

/// Remote calls backing each stage of the sign-in chain.
///
/// Every method is one request/response round trip. Implementations classify
/// failures into [`AuthError`]; the chain runner decides what to retry.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Request a fresh device code.
    async fn request_device_code(&self) -> Result<DeviceCodeGrant, AuthError>;

    /// Poll the token endpoint once for the session's device code.
    async fn poll_device_code(
        &self,
        session: &DeviceCodeSession,
    ) -> Result<DeviceCodePoll, AuthError>;

    /// Trade a stored refresh token for a new Microsoft token.
    async fn refresh_microsoft_token(&self, refresh_token: &str)
        -> Result<MicrosoftToken, AuthError>;

    /// Exchange the Microsoft token for an Xbox Live user token.
    async fn xbox_live(&self, token: &MicrosoftToken) -> Result<XboxLiveToken, AuthError>;

    /// Exchange the Xbox Live token for an XSTS token.
    async fn xbox_security(&self, token: &XboxLiveToken) -> Result<XboxSecurityToken, AuthError>;

    /// Log in to the game services with the XSTS token.
    async fn game_login(&self, token: &XboxSecurityToken) -> Result<GameToken, AuthError>;

    /// Resolve the game token into the user's profile.
    async fn fetch_profile(&self, token: &GameToken) -> Result<Profile, AuthError>;
}
