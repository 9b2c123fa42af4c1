//! Error types for nolauncher.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

use crate::auth::{AuthError, AuthErrorKind};

/// Primary error type for operations outside the sign-in chain.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<toml::de::Error> for LauncherError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl LauncherError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Auth(error) => match error.kind() {
                AuthErrorKind::ProviderPolicy => ErrorCategory::ProviderPolicy,
                _ => match error {
                    AuthError::RateLimited { .. } => ErrorCategory::RateLimit,
                    AuthError::Timeout(_) => ErrorCategory::Timeout,
                    AuthError::Network(_) | AuthError::ProviderUnavailable(_) => {
                        ErrorCategory::Network
                    }
                    _ => ErrorCategory::Authentication,
                },
            },
            Self::Network(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InstanceNotFound(_) | Self::AccountNotFound(_) => ErrorCategory::NotFound,
            Self::InvalidArgument(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::RestartSignIn,
            ErrorCategory::ProviderPolicy => RecoverySuggestion::ResolveOutOfBand,
            ErrorCategory::RateLimit | ErrorCategory::Network => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LauncherError>;
