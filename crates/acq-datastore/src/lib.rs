//! Coordinate-indexed image datastore.
//!
//! A [`Datastore`] is the single point of truth for one acquisition. It owns
//! the dataset lifecycle (unfrozen, then frozen for good), enforces the
//! write rules (no duplicate coordinates, no stray axes, summary metadata
//! set once), announces every mutation on its event bus, and delegates the
//! bytes to a pluggable [`Storage`](acq_store::Storage).
//!
//! # Key Types
//!
//! - [`Datastore`] -- cheap-to-clone handle over the shared store state
//! - [`DatastoreEvent`] -- what listeners see: new images, summary changes,
//!   freezing, save paths
//! - [`ClosingChannel`] -- process-scoped channel announcing discarded stores
//! - [`SaveMode`] -- export format chosen for [`Datastore::save`]
//! - [`PreferenceStore`] -- persisted user choices (the preferred save mode)

pub mod config;
pub mod datastore;
pub mod error;
pub mod event;
pub mod prefs;
pub mod save;

pub use config::DatastoreConfig;
pub use datastore::Datastore;
pub use error::{DatastoreError, DatastoreResult};
pub use event::{ClosingChannel, ClosingEvent, DatastoreEvent};
pub use prefs::{
    preferred_save_mode, set_preferred_save_mode, InMemoryPreferences, PreferenceStore,
};
pub use save::{SaveMode, SaveTarget, SaveTargetChooser};

// Re-export key types
pub use acq_events::{Listener, ListenerError, ListenerId, PublishReport};
pub use acq_store::{InMemoryStorage, Storage, StoreError};
pub use acq_types::{Coords, DatastoreId, Image, SummaryMetadata};
