use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Lifecycle status of one game instance.
///
/// Serialized with an internal `status` tag, so `Downloading` carries its
/// progress inline: `{"status":"Downloading","now":3,"total":10}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "status")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Preparing,
    Checking,
    Downloading {
        now: u64,
        total: u64,
    },
    Running,
    Failed {
        details: String,
    },
}

impl InstanceStatus {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// A launch may be requested from this status. `Failed` stays retryable.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed { .. })
    }

    pub fn is_active(&self) -> bool {
        !self.can_start()
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self::Failed {
            details: details.into(),
        }
    }
}
