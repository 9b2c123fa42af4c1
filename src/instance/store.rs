use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LauncherError, Result};
use crate::util::fs::{atomic_write, read_optional};

pub const INSTANCE_FILE: &str = "instance.json";
const INSTANCE_ID_LEN: usize = 12;

pub const MINECRAFT_UID: &str = "net.minecraft";
pub const FABRIC_UID: &str = "net.fabricmc.fabric-loader";
pub const FORGE_UID: &str = "net.minecraftforge";
pub const LITELOADER_UID: &str = "com.mumfrey.liteloader";
pub const NEOFORGE_UID: &str = "net.neoforged";
pub const QUILT_UID: &str = "org.quiltmc.quilt-loader";

/// Game platform an instance is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum PlatformType {
    Minecraft,
    Fabric,
    Forge,
    Liteloader,
    NeoForge,
    Quilt,
}

impl PlatformType {
    /// Package uid of the platform's top component.
    pub fn uid(&self) -> &'static str {
        match self {
            Self::Minecraft => MINECRAFT_UID,
            Self::Fabric => FABRIC_UID,
            Self::Forge => FORGE_UID,
            Self::Liteloader => LITELOADER_UID,
            Self::NeoForge => NEOFORGE_UID,
            Self::Quilt => QUILT_UID,
        }
    }

    pub fn is_mod_loader(&self) -> bool {
        !matches!(self, Self::Minecraft)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub ptype: PlatformType,
    /// Game version.
    pub version: String,
    /// Loader version. Required for every platform except vanilla.
    #[serde(default)]
    pub mod_version: Option<String>,
}

/// Persisted definition of one instance (`instance.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    pub name: String,
    /// Package uid → version.
    pub dep: BTreeMap<String, String>,
    /// Uid of the top component.
    pub top: String,
}

impl InstanceConfig {
    pub fn game_version(&self) -> Option<&str> {
        self.dep.get(MINECRAFT_UID).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
}

/// Instance definitions, one directory per instance under `root`.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    root: PathBuf,
}

impl InstanceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn create(&self, request: CreateInstanceRequest) -> Result<InstanceConfig> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LauncherError::InvalidArgument(
                "Instance name must not be empty".to_string(),
            ));
        }
        if request.version.trim().is_empty() {
            return Err(LauncherError::InvalidArgument(
                "Game version must not be empty".to_string(),
            ));
        }

        let mut dep = BTreeMap::new();
        dep.insert(MINECRAFT_UID.to_string(), request.version.clone());
        if request.ptype.is_mod_loader() {
            let mod_version = request
                .mod_version
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    LauncherError::InvalidArgument(format!(
                        "{} instances need a loader version",
                        request.ptype
                    ))
                })?;
            dep.insert(request.ptype.uid().to_string(), mod_version);
        }

        let config = InstanceConfig {
            id: new_instance_id(),
            name: name.to_string(),
            dep,
            top: request.ptype.uid().to_string(),
        };
        let path = self.dir(&config.id).join(INSTANCE_FILE);
        atomic_write(&path, &serde_json::to_vec_pretty(&config)?)?;
        info!(instance = %config.id, name = %config.name, top = %config.top, "Created instance");
        Ok(config)
    }

    pub fn get(&self, id: &str) -> Result<InstanceConfig> {
        if id.is_empty() || id.contains(['/', '\\', '.']) {
            return Err(LauncherError::InstanceNotFound(id.to_string()));
        }
        let path = self.dir(id).join(INSTANCE_FILE);
        let raw = read_optional(&path)?
            .ok_or_else(|| LauncherError::InstanceNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every readable instance, sorted by name. Broken entries are skipped.
    pub fn list(&self) -> Result<Vec<InstanceSummary>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut instances = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let file = path.join(INSTANCE_FILE);
            let loaded = read_optional(&file).and_then(|raw| match raw {
                Some(raw) => Ok(Some(serde_json::from_str::<InstanceConfig>(&raw)?)),
                None => Ok(None),
            });
            match loaded {
                Ok(Some(config)) => instances.push(InstanceSummary {
                    id: config.id,
                    name: config.name,
                }),
                Ok(None) => {}
                Err(err) => warn!(path = %file.display(), error = %err, "Skipping unreadable instance"),
            }
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(instances)
    }
}

fn new_instance_id() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(INSTANCE_ID_LEN)
        .collect()
}
