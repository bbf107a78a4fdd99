use acq_events::DEFAULT_PRIORITY;
use acq_export::ExportConfig;
use serde::{Deserialize, Serialize};

/// Datastore configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Priority given to listeners registered without one.
    pub default_priority: i32,
    /// Settings for the file backends created by `save`.
    pub export: ExportConfig,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            export: ExportConfig::default(),
        }
    }
}
