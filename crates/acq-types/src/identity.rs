use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for one datastore instance.
///
/// Datastores are otherwise anonymous; the ID lets log lines and events from
/// a source store and its export copy be told apart.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatastoreId(uuid::Uuid);

impl DatastoreId {
    /// Generate a new time-ordered ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation: the last 8 hex digits, which are random. The
    /// leading digits of a v7 UUID are a timestamp and repeat across stores
    /// created close together.
    pub fn short_id(&self) -> String {
        let hex = self.0.simple().to_string();
        format!("ds:{}", &hex[hex.len() - 8..])
    }
}

impl Default for DatastoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DatastoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatastoreId({})", self.short_id())
    }
}

impl fmt::Display for DatastoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(DatastoreId::new(), DatastoreId::new());
    }

    #[test]
    fn short_id_format() {
        let id = DatastoreId::new();
        let short = id.short_id();
        assert!(short.starts_with("ds:"));
        assert_eq!(short.len(), 11);
        assert_eq!(format!("{id}"), short);
    }
}
