// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ingestion settings, their storage port and a filesystem-backed store.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use ion_merge::MergeOptions;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Key under which [`IngestSettings`] are stored.
pub const SETTINGS_KEY: &str = "ingest";

/// Tunables shared by every session of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Watchdog period used when a request asks for `0`.
    pub default_timeout_secs: u64,
    /// Absolute tolerance for aggregation-coordinate and overlap comparisons.
    pub time_tolerance: f64,
    /// Inbound message queue length per session.
    pub channel_capacity: usize,
    /// Prefix of the per-session chunk topic.
    pub chunk_topic_prefix: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            time_tolerance: 1e-6,
            channel_capacity: 256,
            chunk_topic_prefix: "ion.supplement".to_string(),
        }
    }
}

impl IngestSettings {
    /// Watchdog period for a request; `0` selects the default.
    pub fn timeout_for(&self, requested_secs: u64) -> Duration {
        if requested_secs == 0 {
            Duration::from_secs(self.default_timeout_secs)
        } else {
            Duration::from_secs(requested_secs)
        }
    }

    /// Merge options derived from these settings.
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            tolerance: self.time_tolerance,
        }
    }
}

/// Storage port for raw settings blobs (keyed by logical name).
pub trait SettingsStore {
    /// Load a raw blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, SettingsError>;
    /// Persist a raw blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), SettingsError>;
}

/// Error type for settings operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes settings as JSON and delegates storage to a [`SettingsStore`].
pub struct SettingsService<S> {
    store: S,
}

impl<S> SettingsService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> SettingsService<S>
where
    S: SettingsStore,
{
    /// Load and deserialize the value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, SettingsError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(SettingsError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), SettingsError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Stored [`IngestSettings`], or the defaults when none were saved.
    pub fn load_or_default(&self) -> Result<IngestSettings, SettingsError> {
        Ok(self.load(SETTINGS_KEY)?.unwrap_or_default())
    }
}

/// Settings stored as JSON files under the platform config directory.
pub struct FsSettingsStore {
    base: PathBuf,
}

impl FsSettingsStore {
    /// Create a store rooted at the user config directory (e.g. `~/.config/Ion`).
    pub fn new() -> Result<Self, SettingsError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "Ion")
            .ok_or_else(|| SettingsError::Other("could not resolve config dir".into()))?;
        Self::at(proj.config_dir())
    }

    /// Create a store rooted at `base`.
    pub fn at(base: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl SettingsStore for FsSettingsStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, SettingsError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(SettingsError::NotFound),
            Err(err) => Err(SettingsError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), SettingsError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ion-settings-{name}-{}", std::process::id()))
    }

    #[test]
    fn zero_timeout_selects_default() {
        let settings = IngestSettings {
            default_timeout_secs: 45,
            ..IngestSettings::default()
        };
        assert_eq!(settings.timeout_for(0), Duration::from_secs(45));
        assert_eq!(settings.timeout_for(5), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: IngestSettings = serde_json::from_str(r#"{"time_tolerance":0.5}"#).unwrap();
        assert_eq!(settings.time_tolerance, 0.5);
        assert_eq!(settings.default_timeout_secs, 60);
        assert_eq!(settings.chunk_topic_prefix, "ion.supplement");
    }

    #[test]
    fn fs_store_round_trips_settings() {
        let dir = scratch("roundtrip");
        let service = SettingsService::new(FsSettingsStore::at(&dir).unwrap());
        assert_eq!(service.load_or_default().unwrap(), IngestSettings::default());

        let custom = IngestSettings {
            channel_capacity: 8,
            ..IngestSettings::default()
        };
        service.save(SETTINGS_KEY, &custom).unwrap();
        assert_eq!(service.load_or_default().unwrap(), custom);
        let _ = fs::remove_dir_all(dir);
    }
}
