use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::device::{DeviceId, MediaKind};
use crate::models::error::CaptureError;
use crate::traits::preference_store::PreferenceStore;

/// One stored preference with the time it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Preference store persisted as a pretty-printed JSON object
/// (`{ key: { value, updated_at } }`).
///
/// The file is read once when the store is opened and rewritten on every
/// change. A missing or corrupt file opens as an empty store.
pub struct JsonPreferenceStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PreferenceEntry>>,
}

impl JsonPreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full entry for `key`, including its timestamp.
    pub fn entry(&self, key: &str) -> Option<PreferenceEntry> {
        self.entries.lock().get(key).cloned()
    }

    fn persist(&self, entries: &BTreeMap<String, PreferenceEntry>) -> Result<(), CaptureError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| CaptureError::StorageError(format!("failed to create preference directory: {}", e)))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| CaptureError::StorageError(format!("failed to serialize preferences: {}", e)))?;
        fs::write(&self.path, json)
            .map_err(|e| CaptureError::StorageError(format!("failed to write preferences: {}", e)))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, PreferenceEntry>, CaptureError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let json = fs::read_to_string(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read preferences: {}", e)))?;
    serde_json::from_str(&json)
        .map_err(|e| CaptureError::StorageError(format!("failed to parse preferences: {}", e)))
}

impl PreferenceStore for JsonPreferenceStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|entry| entry.value.clone())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), CaptureError> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            PreferenceEntry {
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), CaptureError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

/// Process-local preference store.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<(), CaptureError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CaptureError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Last-selected device ids, one per media kind.
#[derive(Clone)]
pub struct DevicePreferences {
    store: Arc<dyn PreferenceStore>,
}

impl DevicePreferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn key(kind: MediaKind) -> String {
        format!("capture.lastSelectedDevice.{}", kind)
    }

    pub fn last_selected(&self, kind: MediaKind) -> Option<DeviceId> {
        self.store
            .load(&Self::key(kind))
            .filter(|value| !value.is_empty())
            .map(DeviceId::new)
            .filter(|id| !id.is_unknown())
    }

    /// Persist `id` as the last selection for `kind`. The placeholder id is
    /// never stored.
    pub fn remember(&self, kind: MediaKind, id: &DeviceId) -> Result<(), CaptureError> {
        if id.is_unknown() {
            return Ok(());
        }
        self.store.save(&Self::key(kind), id.as_str())
    }

    pub fn forget(&self, kind: MediaKind) -> Result<(), CaptureError> {
        self.store.remove(&Self::key(kind))
    }
}
