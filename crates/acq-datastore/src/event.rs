use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use acq_events::{EventBus, Listener, ListenerId, PublishReport, DEFAULT_PRIORITY};
use acq_types::{Image, SummaryMetadata};
use tracing::{debug, info};

use crate::datastore::Datastore;

/// Mutation announced on a datastore's own event bus.
#[derive(Clone, Debug)]
pub enum DatastoreEvent {
    /// An image was stored. Published after the storage accepted it.
    NewImage { image: Image, store: Datastore },
    /// Summary metadata was set, or its axis order was extended.
    SummaryMetadataChanged(SummaryMetadata),
    /// The datastore froze. Published once per datastore.
    Frozen { store: Datastore },
    /// The datastore was recorded as saved at this path.
    SavePathSet(PathBuf),
}

impl DatastoreEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewImage { .. } => "new_image",
            Self::SummaryMetadataChanged(_) => "summary_metadata_changed",
            Self::Frozen { .. } => "frozen",
            Self::SavePathSet(_) => "save_path_set",
        }
    }
}

/// A datastore is being discarded.
#[derive(Clone, Debug)]
pub struct ClosingEvent {
    pub store: Datastore,
}

/// Process-scoped channel for [`ClosingEvent`]s.
///
/// Create one at application start, hand it to every datastore that should
/// announce its closing (`Datastore::with_closing_channel`), and call
/// [`shutdown`](Self::shutdown) when the application exits. After shutdown
/// announcements are dropped and listeners are released.
#[derive(Debug, Default)]
pub struct ClosingChannel {
    bus: EventBus<ClosingEvent>,
    shut_down: AtomicBool,
}

impl ClosingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, listener: Arc<dyn Listener<ClosingEvent>>, priority: i32) -> ListenerId {
        self.bus.register(listener, priority)
    }

    pub fn register_default(&self, listener: Arc<dyn Listener<ClosingEvent>>) -> ListenerId {
        self.bus.register(listener, DEFAULT_PRIORITY)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.bus.unregister(id)
    }

    /// Deliver `event` to every listener. Does nothing after shutdown.
    pub fn announce(&self, event: &ClosingEvent) -> PublishReport {
        if self.is_shut_down() {
            debug!(store = %event.store.id(), "closing channel shut down; announcement dropped");
            return PublishReport::default();
        }
        self.bus.publish(event)
    }

    /// Stop delivering and release every listener.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            let released = self.bus.listener_count();
            self.bus.clear();
            info!(released, "closing channel shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
