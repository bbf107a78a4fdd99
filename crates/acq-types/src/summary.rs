use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coords::Coords;
use crate::error::TypeError;

/// Dataset-wide description of an acquisition.
///
/// `SummaryMetadata::default()` is the empty-but-valid summary: every field
/// unset, no axis order, no intended dimensions. Amend a copy with the
/// `with_*` methods; the original is never touched.
///
/// Two fields matter to the datastore itself:
///
/// - `axis_order` -- axes in the order they were first seen to advance past
///   zero, a hint about how the acquisition nests its loops.
/// - `intended_dimensions` -- expected extent per axis, filled in before
///   export so backends can pre-size their output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub name: Option<String>,
    /// File name prefix used by backends that write to disk.
    pub prefix: Option<String>,
    pub user_name: Option<String>,
    pub directory: Option<String>,
    pub channel_group: Option<String>,
    pub channel_names: Vec<String>,
    pub z_step_um: Option<f64>,
    pub wait_interval_ms: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub axis_order: Vec<String>,
    pub intended_dimensions: Option<Coords>,
    /// Free-form user data carried along with the dataset.
    pub user_data: BTreeMap<String, String>,
}

impl SummaryMetadata {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_user_name(mut self, user: impl Into<String>) -> Self {
        self.user_name = Some(user.into());
        self
    }

    pub fn with_channel_group(mut self, group: impl Into<String>) -> Self {
        self.channel_group = Some(group.into());
        self
    }

    pub fn with_channel_names(mut self, names: Vec<String>) -> Self {
        self.channel_names = names;
        self
    }

    pub fn with_z_step_um(mut self, step: f64) -> Self {
        self.z_step_um = Some(step);
        self
    }

    pub fn with_wait_interval_ms(mut self, interval: f64) -> Self {
        self.wait_interval_ms = Some(interval);
        self
    }

    pub fn with_start_date(mut self, date: DateTime<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }

    /// Replace the axis order.
    pub fn with_axis_order(mut self, order: Vec<String>) -> Self {
        self.axis_order = order;
        self
    }

    pub fn with_intended_dimensions(mut self, dims: Coords) -> Self {
        self.intended_dimensions = Some(dims);
        self
    }

    pub fn with_user_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_data.insert(key.into(), value.into());
        self
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string_pretty(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Parse from JSON produced by [`Self::to_json`].
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        serde_json::from_str(json).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        let md = SummaryMetadata::default();
        assert!(md.name.is_none());
        assert!(md.axis_order.is_empty());
        assert!(md.intended_dimensions.is_none());
    }

    #[test]
    fn with_methods_leave_original_untouched() {
        let original = SummaryMetadata::default().with_name("beads");
        let amended = original
            .clone()
            .with_axis_order(vec!["z".into(), "time".into()]);
        assert!(original.axis_order.is_empty());
        assert_eq!(amended.axis_order, vec!["z", "time"]);
        assert_eq!(amended.name.as_deref(), Some("beads"));
    }

    #[test]
    fn json_keeps_intended_dimensions() {
        let md = SummaryMetadata::default()
            .with_prefix("run1")
            .with_z_step_um(0.5)
            .with_intended_dimensions(Coords::builder().time(10).z(5).build())
            .with_user_data("sample", "HeLa");
        let parsed = SummaryMetadata::from_json(&md.to_json().unwrap()).unwrap();
        assert_eq!(parsed, md);
        assert_eq!(
            parsed.intended_dimensions.and_then(|d| d.position("z")),
            Some(5)
        );
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(matches!(
            SummaryMetadata::from_json("{not json"),
            Err(TypeError::Serialization(_))
        ));
    }
}
