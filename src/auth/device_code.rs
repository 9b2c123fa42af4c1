use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::MicrosoftToken;

/// Device-code grant exactly as the identity provider issued it.
#[derive(Debug, Clone)]
pub struct DeviceCodeGrant {
    pub verification_url: String,
    pub user_code: String,
    pub device_code: String,
    pub interval_secs: u64,
    pub expires_in_secs: u64,
}

/// One in-flight device-authorization code owned by a sign-in attempt.
///
/// `generation` identifies which code of the attempt this is; results of
/// calls made with an older generation are discarded.
///
/// # Example
/// ```no_run
/// use nolauncher::auth::{DeviceCodeGrant, DeviceCodeSession};
///
/// let session = DeviceCodeSession::from_grant(
///     DeviceCodeGrant {
///         verification_url: "https://www.microsoft.com/link".to_string(),
///         user_code: "ABCD-EFGH".to_string(),
///         device_code: "device-code".to_string(),
///         interval_secs: 5,
///         expires_in_secs: 900,
///     },
///     1,
/// );
/// assert!(!session.is_expired());
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub generation: u64,
    pub verification_url: String,
    pub user_code: String,
    pub device_code: String,
    pub interval_secs: u64,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl DeviceCodeSession {
    pub fn from_grant(grant: DeviceCodeGrant, generation: u64) -> Self {
        let lifetime = Duration::from_secs(grant.expires_in_secs);
        Self {
            generation,
            verification_url: grant.verification_url,
            user_code: grant.user_code,
            device_code: grant.device_code,
            interval_secs: grant.interval_secs,
            expires_at: Utc::now()
                + chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero()),
            deadline: Instant::now() + lifetime,
        }
    }

    /// Monotonic instant at which the code stops being accepted.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expires_in(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Polling outcome for a device code.
#[derive(Debug, Clone)]
pub enum DeviceCodePoll {
    Pending { interval_secs: u64 },
    SlowDown { interval_secs: u64 },
    Authorized { token: MicrosoftToken },
    AccessDenied,
    Expired,
}
