use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::registry::{InstanceStatusRegistry, StatusReporter};
use super::status::InstanceStatus;
use super::store::InstanceConfig;
use crate::accounts::Account;

/// Why a launch driver could not run an instance.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No launch program configured")]
    NoProgram,
    #[error("Instance directory missing: {0}")]
    MissingDirectory(PathBuf),
    #[error("Failed to start game process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to wait for game process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("status:{status:?} signal:{signal:?}")]
    Exited {
        status: Option<i32>,
        signal: Option<i32>,
    },
}

impl LaunchError {
    fn from_exit(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self::Exited {
            status: status.code(),
            signal,
        }
    }
}

/// Everything a driver needs to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance: InstanceConfig,
    pub directory: PathBuf,
    pub account: Option<Account>,
}

/// Runs the external process behind an instance and reports its status.
///
/// A driver returns once the process is gone. Returning an error marks the
/// instance `Failed` with the error as details.
#[async_trait]
pub trait LaunchDriver: Send + Sync {
    async fn launch(&self, request: LaunchRequest, reporter: StatusReporter)
        -> Result<(), LaunchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started,
    /// The instance is already preparing or running. Nothing was changed.
    AlreadyActive,
}

/// Starts instances through a [`LaunchDriver`], one run per instance at a time.
pub struct InstanceLauncher {
    registry: Arc<InstanceStatusRegistry>,
    driver: Arc<dyn LaunchDriver>,
    runs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl InstanceLauncher {
    pub fn new(registry: Arc<InstanceStatusRegistry>, driver: Arc<dyn LaunchDriver>) -> Self {
        Self {
            registry,
            driver,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceStatusRegistry> {
        &self.registry
    }

    /// Start the instance unless it is already active. `Failed` and `Stopped`
    /// instances are always accepted.
    pub fn launch(&self, request: LaunchRequest) -> LaunchOutcome {
        let id = request.instance.id.clone();
        if !self.registry.try_begin(&id) {
            info!(instance = %id, "Launch ignored, instance already active");
            return LaunchOutcome::AlreadyActive;
        }

        let reporter = StatusReporter::new(id.clone(), self.registry.clone());
        let driver = self.driver.clone();
        let run = tokio::spawn(async move {
            info!(instance = %reporter.id(), "Launching instance");
            match driver.launch(request, reporter.clone()).await {
                Ok(()) => info!(instance = %reporter.id(), "Instance run finished"),
                Err(error) => {
                    warn!(instance = %reporter.id(), error = %error, "Instance launch failed");
                    reporter.failed(error.to_string());
                }
            }
        });
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, run);
        LaunchOutcome::Started
    }

    /// Launch again after a failure.
    pub fn retry_launch(&self, request: LaunchRequest) -> LaunchOutcome {
        self.launch(request)
    }

    /// Wait until the current run of `id` ends. Returns immediately if none.
    pub async fn wait(&self, id: &str) {
        let run = self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if let Some(run) = run {
            if let Err(error) = run.await {
                warn!(instance = %id, error = %error, "Launch task aborted");
                self.registry.set_status(id, InstanceStatus::failed(error.to_string()));
            }
        }
    }
}

/// Spawns a configured program inside the instance directory.
///
/// The instance and account are passed as `NOLAUNCHER_*` environment
/// variables. Exit code 0 reports `Stopped`, anything else `Failed`.
#[derive(Debug, Clone)]
pub struct CommandLaunchDriver {
    program: Option<String>,
    args: Vec<String>,
}

impl CommandLaunchDriver {
    pub fn new(program: Option<String>, args: Vec<String>) -> Self {
        Self { program, args }
    }

    fn command(&self, request: &LaunchRequest) -> Result<Command, LaunchError> {
        let program = self.program.as_deref().ok_or(LaunchError::NoProgram)?;
        let mut command = Command::new(program);
        command
            .args(&self.args)
            .current_dir(&request.directory)
            .env("NOLAUNCHER_INSTANCE_ID", &request.instance.id)
            .env("NOLAUNCHER_INSTANCE_NAME", &request.instance.name)
            .env("NOLAUNCHER_INSTANCE_TOP", &request.instance.top)
            .kill_on_drop(true);
        if let Some(version) = request.instance.game_version() {
            command.env("NOLAUNCHER_GAME_VERSION", version);
        }
        if let Some(account) = &request.account {
            command
                .env("NOLAUNCHER_USERNAME", account.name())
                .env("NOLAUNCHER_UUID", account.id())
                .env("NOLAUNCHER_ACCESS_TOKEN", &account.game_token.access_token);
        }
        Ok(command)
    }
}

#[async_trait]
impl LaunchDriver for CommandLaunchDriver {
    async fn launch(
        &self,
        request: LaunchRequest,
        reporter: StatusReporter,
    ) -> Result<(), LaunchError> {
        reporter.report(InstanceStatus::Checking);
        if !request.directory.is_dir() {
            return Err(LaunchError::MissingDirectory(request.directory));
        }

        let mut child = self.command(&request)?.spawn().map_err(LaunchError::Spawn)?;
        reporter.report(InstanceStatus::Running);
        info!(instance = %reporter.id(), pid = ?child.id(), "Game process started");

        let status = child.wait().await.map_err(LaunchError::Wait)?;
        if !status.success() {
            return Err(LaunchError::from_exit(status));
        }
        reporter.report(InstanceStatus::Stopped);
        Ok(())
    }
}
