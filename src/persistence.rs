//! User preference storage.
//!
//! Only the selected endpoint and the preferred protocol survive a restart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::vpn::tunnel::VpnProtocol;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub selected_endpoint_id: Option<String>,
    #[serde(default)]
    pub protocol: VpnProtocol,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Preferences {
    /// Copy with a new selection and a fresh timestamp.
    pub fn with_selection(&self, endpoint_id: Option<&str>) -> Self {
        Self {
            selected_endpoint_id: endpoint_id.map(str::to_string),
            protocol: self.protocol,
            updated_at: Some(Utc::now()),
        }
    }

    /// Copy with a new preferred protocol and a fresh timestamp.
    pub fn with_protocol(&self, protocol: VpnProtocol) -> Self {
        Self {
            selected_endpoint_id: self.selected_endpoint_id.clone(),
            protocol,
            updated_at: Some(Utc::now()),
        }
    }
}

/// Key-value store for [`Preferences`].
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<Preferences, EngineError>;

    fn save(&self, preferences: &Preferences) -> Result<(), EngineError>;
}

/// Preferences stored as pretty JSON on disk.
pub struct JsonFilePreferences {
    path: PathBuf,
}

impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/GameBoost/preferences.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("GameBoost").join("preferences.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for JsonFilePreferences {
    fn load(&self) -> Result<Preferences, EngineError> {
        if !self.path.exists() {
            log::debug!("Preferences file does not exist: {:?}", self.path);
            return Ok(Preferences::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let preferences = serde_json::from_str(&content)?;
        log::debug!("Loaded preferences from {:?}", self.path);
        Ok(preferences)
    }

    fn save(&self, preferences: &Preferences) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(preferences)
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        // Atomic replace.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        log::debug!("Saved preferences to {:?}", self.path);
        Ok(())
    }
}

/// In-memory store for hosts without writable storage.
#[derive(Default)]
pub struct MemoryPreferences {
    current: Mutex<Preferences>,
}

impl MemoryPreferences {
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }
}

impl Persistence for MemoryPreferences {
    fn load(&self) -> Result<Preferences, EngineError> {
        Ok(self.current.lock().clone())
    }

    fn save(&self, preferences: &Preferences) -> Result<(), EngineError> {
        *self.current.lock() = preferences.clone();
        Ok(())
    }
}
