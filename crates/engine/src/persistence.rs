//! Settings collaborator: favorites and theme.
//!
//! Loaded once when the engine starts and written back on every change. A
//! store that fails is logged and the engine carries on with defaults.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;

use crate::error::{EngineError, Result};
use crate::message::MessageId;

pub const DEFAULT_THEME: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    pub favorites: Vec<MessageId>,
    pub theme: String,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            favorites: Vec::new(),
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<StoredSettings>;
    async fn store(&self, settings: &StoredSettings) -> Result<()>;
}

/// Favorite message ids. The engine reads it; only toggles change it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoritesSet(BTreeSet<MessageId>);

impl FavoritesSet {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.0.contains(id)
    }

    /// Returns whether `id` is a favorite afterwards.
    pub fn toggle(&mut self, id: &MessageId) -> bool {
        if self.0.remove(id) {
            false
        } else {
            self.0.insert(id.clone());
            true
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageId> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<MessageId> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<MessageId> for FavoritesSet {
    fn from_iter<T: IntoIterator<Item = MessageId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// JSON file on disk. A missing file means defaults.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn load(&self) -> Result<StoredSettings> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StoredSettings::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, settings: &StoredSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process store for tests and embedders without storage.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<StoredSettings>,
    unavailable: bool,
}

impl MemorySettingsStore {
    pub fn new(settings: StoredSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            unavailable: false,
        }
    }

    /// A store whose every call fails.
    pub fn unavailable() -> Self {
        Self {
            settings: Mutex::new(StoredSettings::default()),
            unavailable: true,
        }
    }

    pub fn current(&self) -> StoredSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(EngineError::Other("settings storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<StoredSettings> {
        self.check()?;
        Ok(self.current())
    }

    async fn store(&self, settings: &StoredSettings) -> Result<()> {
        self.check()?;
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}
