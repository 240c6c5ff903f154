// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory settings store fake for testing without filesystem I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ion_session::{SettingsError, SettingsStore};

/// In-memory implementation of [`SettingsStore`].
///
/// # Example
///
/// ```
/// use ion_dry_tests::InMemorySettingsStore;
/// use ion_session::{IngestSettings, SettingsService, SETTINGS_KEY};
///
/// let store = InMemorySettingsStore::new();
/// let service = SettingsService::new(store.clone());
/// service.save(SETTINGS_KEY, &IngestSettings::default()).unwrap();
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    inner: Arc<Mutex<SettingsInner>>,
}

#[derive(Default)]
struct SettingsInner {
    data: HashMap<String, Vec<u8>>,
    save_count: usize,
    fail_on_load: bool,
}

impl InMemorySettingsStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).fail_on_load = fail;
    }

    /// Number of `save_raw` calls.
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).save_count
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, SettingsError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail_on_load {
            return Err(SettingsError::Other("load failed".into()));
        }
        inner.data.get(key).cloned().ok_or(SettingsError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), SettingsError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.save_count += 1;
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use ion_session::{IngestSettings, SettingsService, SETTINGS_KEY};

    #[test]
    fn load_failure_propagates() {
        let store = InMemorySettingsStore::new();
        store.set_fail_on_load(true);
        let service = SettingsService::new(store);
        assert!(matches!(
            service.load_or_default(),
            Err(SettingsError::Other(_))
        ));
    }

    #[test]
    fn saved_settings_load_back() {
        let service = SettingsService::new(InMemorySettingsStore::new());
        let settings = IngestSettings {
            default_timeout_secs: 5,
            ..IngestSettings::default()
        };
        service.save(SETTINGS_KEY, &settings).unwrap();
        let raw = service.into_inner().load_raw(SETTINGS_KEY).unwrap();
        let back: IngestSettings = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back, settings);
    }
}
