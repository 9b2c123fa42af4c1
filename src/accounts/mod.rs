//! Signed-in accounts and the currently selected user.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{GameToken, Profile};
use crate::error::{LauncherError, Result};
use crate::events::{EventBus, LauncherEvent};
use crate::util::fs::{atomic_write, read_optional};

const ACCOUNT_FILE_VERSION: u32 = 1;

/// Result of a completed sign-in: the profile plus what is needed to launch
/// and to sign in again without a device code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub profile: Profile,
    pub game_token: GameToken,
    pub refresh_token: Option<String>,
    pub signed_in_at: DateTime<Utc>,
}

impl Account {
    pub fn new(profile: Profile, game_token: GameToken, refresh_token: Option<String>) -> Self {
        Self {
            profile,
            game_token,
            refresh_token,
            signed_in_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn needs_refresh(&self) -> bool {
        self.game_token.is_expired()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountFile {
    version: u32,
    current: Option<String>,
    accounts: BTreeMap<String, Account>,
}

/// Persisted account list, keyed by profile id.
pub struct AccountStore {
    path: PathBuf,
    bus: EventBus,
    data: RwLock<AccountFile>,
}

impl AccountStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>, bus: EventBus) -> Result<Self> {
        let path = path.into();
        let data = match read_optional(&path)? {
            Some(raw) => {
                let file: AccountFile = serde_json::from_str(&raw)?;
                if file.version != ACCOUNT_FILE_VERSION {
                    return Err(LauncherError::Configuration(format!(
                        "Unsupported accounts file version {} at {}",
                        file.version,
                        path.display()
                    )));
                }
                file
            }
            None => AccountFile {
                version: ACCOUNT_FILE_VERSION,
                ..AccountFile::default()
            },
        };
        Ok(Self {
            path,
            bus,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the account with the same profile id.
    pub fn add(&self, account: Account) -> Result<()> {
        info!(user = %account.id(), name = %account.name(), "Saving account");
        self.commit(|data| {
            data.accounts.insert(account.id().to_string(), account);
            Ok(())
        })
    }

    pub fn list(&self) -> Vec<Account> {
        self.read().accounts.values().cloned().collect()
    }

    /// Profiles of every stored account.
    pub fn profiles(&self) -> Vec<Profile> {
        self.read()
            .accounts
            .values()
            .map(|account| account.profile.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.read().accounts.get(id).cloned()
    }

    pub fn current(&self) -> Option<String> {
        self.read().current.clone()
    }

    pub fn current_account(&self) -> Option<Account> {
        let data = self.read();
        data.current
            .as_ref()
            .and_then(|id| data.accounts.get(id))
            .cloned()
    }

    /// Select `id` as the current user and announce it.
    pub fn set_current(&self, id: &str) -> Result<()> {
        self.commit(|data| {
            if !data.accounts.contains_key(id) {
                return Err(LauncherError::AccountNotFound(id.to_string()));
            }
            data.current = Some(id.to_string());
            Ok(())
        })?;
        info!(user = %id, "Switched current user");
        self.bus.publish(LauncherEvent::ChangeUser {
            uuid: Some(id.to_string()),
        });
        Ok(())
    }

    /// Forget `id`. Clears the current user if it was `id`.
    pub fn logout(&self, id: &str) -> Result<()> {
        let current = self.commit(|data| {
            if data.accounts.remove(id).is_none() {
                return Err(LauncherError::AccountNotFound(id.to_string()));
            }
            if data.current.as_deref() == Some(id) {
                data.current = None;
            }
            Ok(data.current.clone())
        })?;
        info!(user = %id, "Logged out");
        self.bus.publish(LauncherEvent::ChangeUser { uuid: current });
        Ok(())
    }

    /// Apply `change` to a copy of the file and keep it only once it is on
    /// disk.
    fn commit<T>(&self, change: impl FnOnce(&mut AccountFile) -> Result<T>) -> Result<T> {
        let mut data = self.write();
        let mut next = data.clone();
        let out = change(&mut next)?;
        self.save(&next)?;
        *data = next;
        Ok(out)
    }

    fn save(&self, data: &AccountFile) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(data)?;
        atomic_write(&self.path, &serialized)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AccountFile> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AccountFile> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}
