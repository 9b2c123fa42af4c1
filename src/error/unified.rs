//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    ProviderPolicy,
    RateLimit,
    Network,
    Timeout,
    Configuration,
    Serialization,
    Storage,
    NotFound,
    Unknown,
}

/// Suggested recovery action surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Show a spinner and try again later.
    RetryWithBackoff,
    /// Start a new sign-in attempt.
    RestartSignIn,
    /// Explain the block; the user must act outside the launcher.
    ResolveOutOfBand,
    CheckConfiguration,
    IncreaseTimeout,
    ContactSupport,
}
