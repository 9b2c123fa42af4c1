use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use super::chain::AuthStage;

/// Provider-side policy that blocks sign-in until the user acts elsewhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
pub enum PolicyBlock {
    /// The account's region cannot use the service.
    CountryBan,
    /// The Xbox account must complete adult verification.
    NeedAdultVerification,
    /// A child account must be added to a family by an adult.
    AddToFamily,
}

impl PolicyBlock {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Default explanation shown when the provider sends none.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::CountryBan => "The account is from a country where Xbox Live is not available",
            Self::NeedAdultVerification => "The account needs adult verification on the Xbox page",
            Self::AddToFamily => {
                "The account belongs to a child and must be added to a Family by an adult"
            }
        }
    }
}

/// Broad handling class of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Network or provider hiccup. Retried only inside the polling cadence.
    Transient,
    /// Aborts the whole sign-in attempt.
    FatalChain,
    /// Surfaced verbatim, never retried, needs out-of-band user action.
    ProviderPolicy,
}

/// Normalized authentication errors across stages.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("Access denied")]
    AccessDenied,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("{block}: {message}")]
    Policy { block: PolicyBlock, message: String },
    #[error("The account doesn't have an Xbox account yet")]
    XboxAccountMissing,
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid auth step: expected {expected}, found {found}")]
    InvalidStage { expected: AuthStage, found: AuthStage },
    #[error("Sign-in attempt cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    pub fn policy(block: PolicyBlock, message: impl Into<String>) -> Self {
        Self::Policy {
            block,
            message: message.into(),
        }
    }

    /// The policy that blocked sign-in, if any.
    pub fn blocked_by(&self) -> Option<PolicyBlock> {
        match self {
            Self::Policy { block, .. } => Some(*block),
            _ => None,
        }
    }

    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::ProviderUnavailable(_)
            | Self::RateLimited { .. }
            | Self::Network(_)
            | Self::Timeout(_) => AuthErrorKind::Transient,
            Self::Policy { .. } => AuthErrorKind::ProviderPolicy,
            _ => AuthErrorKind::FatalChain,
        }
    }

    /// Wire status of the gateway error payload.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Policy { block, .. } => block.as_str(),
            _ => "error",
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == AuthErrorKind::Transient
    }

    /// Human-readable detail. Policy messages are passed through verbatim.
    pub fn detail(&self) -> String {
        match self {
            Self::Policy { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Suggested wait before the next attempt, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout(0);
        }
        if error.is_connect() {
            return Self::ProviderUnavailable(error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
