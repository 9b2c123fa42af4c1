//! Instance definitions, lifecycle status and launching.

pub mod launcher;
pub mod registry;
pub mod status;
pub mod store;

pub use launcher::{
    CommandLaunchDriver, InstanceLauncher, LaunchDriver, LaunchError, LaunchOutcome, LaunchRequest,
};
pub use registry::{InstanceStatusRegistry, StatusReporter, StatusSubscription};
pub use status::InstanceStatus;
pub use store::{
    CreateInstanceRequest, InstanceConfig, InstanceStore, InstanceSummary, PlatformType,
};
