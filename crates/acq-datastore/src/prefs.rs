use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::error;

use crate::save::SaveMode;

/// Namespace for preferences owned by the datastore.
pub const PREFERENCE_NAMESPACE: &str = "acq.datastore";

/// Key under which the preferred save mode is stored.
pub const SAVE_MODE_KEY: &str = "default format for saving data";

/// Persistent string key/value store for user preferences.
pub trait PreferenceStore: Send + Sync {
    /// Stored value, or `default` if there is none.
    fn get(&self, namespace: &str, key: &str, default: &str) -> String;

    fn set(&self, namespace: &str, key: &str, value: &str);
}

/// Preference store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    values: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, namespace: &str, key: &str, default: &str) -> String {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&self, namespace: &str, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((namespace.to_string(), key.to_string()), value.to_string());
    }
}

/// The user's preferred save mode, [`SaveMode::StackFile`] if never set.
///
/// An unrecognized stored value is logged and yields `None`.
pub fn preferred_save_mode(prefs: &dyn PreferenceStore) -> Option<SaveMode> {
    let stored = prefs.get(
        PREFERENCE_NAMESPACE,
        SAVE_MODE_KEY,
        SaveMode::StackFile.display_name(),
    );
    match stored.parse() {
        Ok(mode) => Some(mode),
        Err(_) => {
            error!(value = %stored, "unrecognized save mode preference");
            None
        }
    }
}

pub fn set_preferred_save_mode(prefs: &dyn PreferenceStore, mode: SaveMode) {
    prefs.set(PREFERENCE_NAMESPACE, SAVE_MODE_KEY, mode.display_name());
}
