use serde::{Deserialize, Serialize};

/// When file-backed stores force data to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every image (safest, slowest).
    EveryWrite,
    /// `fsync` once, when the store is finalized.
    #[default]
    OnFinalize,
}

/// Configuration shared by the export backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Sync strategy.
    pub sync: SyncMode,
    /// Prefix for every file a backend creates.
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sync: SyncMode::default(),
            file_prefix: "acq".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ExportConfig::default();
        assert_eq!(c.sync, SyncMode::OnFinalize);
        assert_eq!(c.file_prefix, "acq");
    }
}
