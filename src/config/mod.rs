//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LauncherError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::util::fs::read_optional;

pub const ENV_CONFIG_FILE: &str = "NOLAUNCHER_CONFIG";
pub const ENV_CLIENT_ID: &str = "NOLAUNCHER_CLIENT_ID";
pub const ENV_DATA_DIR: &str = "NOLAUNCHER_DATA_DIR";
pub const ENV_CALL_TIMEOUT_SECS: &str = "NOLAUNCHER_CALL_TIMEOUT_SECS";
pub const ENV_LAUNCH_PROGRAM: &str = "NOLAUNCHER_LAUNCH_PROGRAM";

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const CONFIG_FILE_NAME: &str = "config.toml";

/// Launcher settings.
///
/// Resolution order:
/// 1. Explicit values set through the `with_*` builders
/// 2. Environment variables (a `.env` file is loaded first if present)
/// 3. `config.toml` in the platform config directory, or `$NOLAUNCHER_CONFIG`
/// 4. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    /// OAuth client id registered for the device-code flow.
    pub client_id: Option<String>,
    pub data_dir: PathBuf,
    pub call_timeout_secs: u64,
    pub event_capacity: usize,
    /// Program spawned to run an instance.
    pub launch_program: Option<String>,
    pub launch_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            data_dir: default_data_dir(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            launch_program: None,
            launch_args: Vec::new(),
        }
    }
}

impl LauncherConfig {
    /// Load file and environment layers.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let path = std::env::var_os(ENV_CONFIG_FILE)
            .map(PathBuf::from)
            .or_else(default_config_path);
        let mut config = match path {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a TOML config file. A missing file yields the defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        match read_optional(path)? {
            Some(raw) => {
                debug!(path = %path.display(), "Loaded config file");
                Ok(toml::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Overlay environment values read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(client_id) = lookup(ENV_CLIENT_ID).filter(|v| !v.is_empty()) {
            self.client_id = Some(client_id);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_CALL_TIMEOUT_SECS) {
            self.call_timeout_secs = secs.trim().parse().map_err(|_| {
                LauncherError::Configuration(format!(
                    "{ENV_CALL_TIMEOUT_SECS} must be a number of seconds, got {secs:?}"
                ))
            })?;
        }
        if let Some(program) = lookup(ENV_LAUNCH_PROGRAM).filter(|v| !v.is_empty()) {
            self.launch_program = Some(program);
        }
        Ok(())
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_launch_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.launch_program = Some(program.into());
        self.launch_args = args;
        self
    }

    pub fn client_id(&self) -> Result<&str> {
        self.client_id.as_deref().ok_or_else(|| {
            LauncherError::Configuration(format!(
                "No OAuth client id configured; set {ENV_CLIENT_ID} or client_id in {CONFIG_FILE_NAME}"
            ))
        })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "nolauncher", "nolauncher")
}

/// `config.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".nolauncher"))
}
