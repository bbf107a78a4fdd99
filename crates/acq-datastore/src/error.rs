use acq_store::StoreError;
use acq_types::Coords;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("datastore is frozen")]
    Frozen,

    #[error("an image already exists at {0}")]
    DuplicateCoordinate(Coords),

    #[error("axis {axis:?} is not one of the store's axes {allowed:?}")]
    InvalidAxis { axis: String, allowed: Vec<String> },

    #[error("summary metadata has already been set")]
    AlreadySet,

    #[error("unsupported save mode: {0}")]
    UnsupportedMode(String),

    #[error("no storage attached to datastore")]
    NoStorage,

    #[error("datastore lock poisoned")]
    LockPoisoned,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl DatastoreError {
    /// Errors that reject a write outright because of the store's rules, as
    /// opposed to failures of the underlying storage.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Frozen | Self::DuplicateCoordinate(_) | Self::InvalidAxis { .. } | Self::AlreadySet
        )
    }
}

pub type DatastoreResult<T> = Result<T, DatastoreError>;
