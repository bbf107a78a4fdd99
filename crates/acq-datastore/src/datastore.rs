use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use acq_events::{EventBus, Listener, ListenerId, PublishReport};
use acq_store::{Storage, StoreError};
use acq_types::{Coords, DatastoreId, Image, SummaryMetadata};
use tracing::{debug, error, info};

use crate::config::DatastoreConfig;
use crate::error::{DatastoreError, DatastoreResult};
use crate::event::{ClosingChannel, ClosingEvent, DatastoreEvent};

/// State changed only under the lifecycle lock.
#[derive(Debug, Default)]
struct Lifecycle {
    frozen: bool,
    summary_set: bool,
    save_path: Option<PathBuf>,
    /// Axes accepted before the storage has seen them. Set on export
    /// targets so the first replayed image does not narrow the axis set.
    declared_axes: Vec<String>,
}

struct Inner {
    id: DatastoreId,
    config: DatastoreConfig,
    storage: RwLock<Option<Arc<dyn Storage>>>,
    lifecycle: Mutex<Lifecycle>,
    bus: EventBus<DatastoreEvent>,
    closing: RwLock<Option<Arc<ClosingChannel>>>,
}

/// Coordinate-indexed image store for one acquisition.
///
/// `Datastore` is a handle: clones share the same state, which is what lets
/// events carry the store they came from.
///
/// # Lifecycle
///
/// A datastore starts unfrozen. [`freeze`](Self::freeze) moves it to frozen
/// for good; after that every write fails with [`DatastoreError::Frozen`].
///
/// # Write rules
///
/// - One image per coordinate.
/// - Once the storage reports axes, images may only use those axes.
/// - Summary metadata is set at most once. The only later change is the
///   axis order, extended automatically as images advance new axes.
///
/// # Locking
///
/// Freezing, setting summary metadata, setting the save path, and the
/// axis-order amendment share one lock. Image writes only take the
/// storage's own lock. Events are published after the lifecycle lock is
/// released, so a listener may call back into the datastore.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<Inner>,
}

impl Datastore {
    /// Create a datastore with default configuration and no storage.
    pub fn new() -> Self {
        Self::with_config(DatastoreConfig::default())
    }

    pub fn with_config(config: DatastoreConfig) -> Self {
        let id = DatastoreId::new();
        debug!(%id, "datastore created");
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                storage: RwLock::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                bus: EventBus::new(),
                closing: RwLock::new(None),
            }),
        }
    }

    /// Attach `storage` and return the datastore, for chained construction.
    pub fn with_storage(self, storage: Arc<dyn Storage>) -> Self {
        self.set_storage(storage);
        self
    }

    /// Attach the channel `close` announces on.
    pub fn with_closing_channel(self, channel: Arc<ClosingChannel>) -> Self {
        *self
            .inner
            .closing
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(channel);
        self
    }

    pub fn id(&self) -> DatastoreId {
        self.inner.id
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.inner.config
    }

    /// Returns `true` if both handles refer to the same datastore.
    pub fn same_as(&self, other: &Datastore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- Storage binding ----

    /// Bind (or replace) the backing storage.
    pub fn set_storage(&self, storage: Arc<dyn Storage>) {
        *self
            .inner
            .storage
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(storage);
        debug!(id = %self.inner.id, "storage attached");
    }

    /// The backing storage, if one is bound.
    pub fn storage(&self) -> Option<Arc<dyn Storage>> {
        self.inner
            .storage
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn require_storage(&self) -> DatastoreResult<Arc<dyn Storage>> {
        self.storage().ok_or(DatastoreError::NoStorage)
    }

    fn lifecycle(&self) -> DatastoreResult<MutexGuard<'_, Lifecycle>> {
        self.inner
            .lifecycle
            .lock()
            .map_err(|_| DatastoreError::LockPoisoned)
    }

    // ---- Listeners ----

    pub fn register(&self, listener: Arc<dyn Listener<DatastoreEvent>>, priority: i32) -> ListenerId {
        self.inner.bus.register(listener, priority)
    }

    /// Register at the configured default priority.
    pub fn register_default(&self, listener: Arc<dyn Listener<DatastoreEvent>>) -> ListenerId {
        self.inner
            .bus
            .register(listener, self.inner.config.default_priority)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.inner.bus.unregister(id)
    }

    /// Deliver an arbitrary event to this datastore's listeners.
    pub fn publish_event(&self, event: &DatastoreEvent) -> PublishReport {
        let report = self.inner.bus.publish(event);
        if !report.is_clean() {
            debug!(
                id = %self.inner.id,
                event = event.kind(),
                failures = report.failures.len(),
                "some listeners failed"
            );
        }
        report
    }

    // ---- Reads ----

    pub fn image(&self, coords: &Coords) -> DatastoreResult<Option<Image>> {
        match self.storage() {
            Some(storage) => Ok(storage.image(coords)?),
            None => Ok(None),
        }
    }

    pub fn any_image(&self) -> DatastoreResult<Option<Image>> {
        match self.storage() {
            Some(storage) => Ok(storage.any_image()?),
            None => Ok(None),
        }
    }

    pub fn images_matching(&self, partial: &Coords) -> DatastoreResult<Vec<Image>> {
        match self.storage() {
            Some(storage) => Ok(storage.images_matching(partial)?),
            None => Ok(Vec::new()),
        }
    }

    /// Every stored coordinate, in no particular order.
    pub fn unordered_coords(&self) -> DatastoreResult<Vec<Coords>> {
        match self.storage() {
            Some(storage) => Ok(storage.unordered_coords()?),
            None => Ok(Vec::new()),
        }
    }

    pub fn max_index(&self, axis: &str) -> DatastoreResult<Option<u32>> {
        match self.storage() {
            Some(storage) => Ok(storage.max_index(axis)?),
            None => Ok(None),
        }
    }

    /// Number of positions along `axis` (largest index + 1), or 0 if no
    /// image uses it.
    pub fn axis_length(&self, axis: &str) -> DatastoreResult<u32> {
        Ok(self.max_index(axis)?.map_or(0, |max| max + 1))
    }

    pub fn max_indices(&self) -> DatastoreResult<Coords> {
        match self.storage() {
            Some(storage) => Ok(storage.max_indices()?),
            None => Ok(Coords::new()),
        }
    }

    pub fn axes(&self) -> DatastoreResult<Vec<String>> {
        match self.storage() {
            Some(storage) => Ok(storage.axes()?),
            None => Ok(Vec::new()),
        }
    }

    pub fn num_images(&self) -> DatastoreResult<usize> {
        match self.storage() {
            Some(storage) => Ok(storage.num_images()?),
            None => Ok(0),
        }
    }

    /// The summary metadata.
    ///
    /// `None` only when no storage is bound; a storage without a summary
    /// yields the empty default.
    pub fn summary_metadata(&self) -> DatastoreResult<Option<SummaryMetadata>> {
        match self.storage() {
            Some(storage) => Ok(Some(storage.summary_metadata()?.unwrap_or_default())),
            None => Ok(None),
        }
    }

    // ---- Writes ----

    /// Store an image and announce it.
    pub fn put_image(&self, image: Image) -> DatastoreResult<()> {
        let declared = {
            let lifecycle = self.lifecycle()?;
            if lifecycle.frozen {
                return Err(DatastoreError::Frozen);
            }
            lifecycle.declared_axes.clone()
        };
        let storage = self.require_storage()?;
        if storage.contains(&image.coords)? {
            return Err(DatastoreError::DuplicateCoordinate(image.coords));
        }

        let mut allowed = storage.axes()?;
        for axis in declared {
            if !allowed.contains(&axis) {
                allowed.push(axis);
            }
        }
        if !allowed.is_empty() {
            if let Some(axis) = image
                .coords
                .axes()
                .into_iter()
                .find(|axis| !allowed.contains(axis))
            {
                return Err(DatastoreError::InvalidAxis { axis, allowed });
            }
        }

        let order = storage
            .summary_metadata()?
            .map(|md| md.axis_order)
            .unwrap_or_default();
        let advanced: Vec<String> = image
            .coords
            .iter()
            .filter(|(axis, pos)| *pos > 0 && !order.iter().any(|known| known == axis))
            .map(|(axis, _)| axis.to_string())
            .collect();

        storage.put_image(&image).map_err(|e| match e {
            StoreError::Occupied(coords) => DatastoreError::DuplicateCoordinate(coords),
            StoreError::Finalized => DatastoreError::Frozen,
            other => other.into(),
        })?;
        debug!(id = %self.inner.id, coords = %image.coords, "image stored");

        self.publish_event(&DatastoreEvent::NewImage {
            image,
            store: self.clone(),
        });

        if !advanced.is_empty() {
            self.extend_axis_order(storage.as_ref(), advanced)?;
        }
        Ok(())
    }

    /// Append newly advanced axes to the recorded axis order.
    ///
    /// The one write to summary metadata allowed after it has been set.
    /// Accept images on `axes` even before the storage reports them.
    pub(crate) fn declare_axes(&self, axes: Vec<String>) -> DatastoreResult<()> {
        self.lifecycle()?.declared_axes = axes;
        Ok(())
    }

    fn extend_axis_order(&self, storage: &dyn Storage, advanced: Vec<String>) -> DatastoreResult<()> {
        let amended = {
            let lifecycle = self.lifecycle()?;
            if lifecycle.frozen {
                debug!(id = %self.inner.id, ?advanced, "frozen; axis order left as is");
                return Ok(());
            }
            let mut md = storage.summary_metadata()?.unwrap_or_default();
            let missing: Vec<String> = advanced
                .into_iter()
                .filter(|axis| !md.axis_order.contains(axis))
                .collect();
            if missing.is_empty() {
                return Ok(());
            }
            md.axis_order.extend(missing);
            storage.put_summary_metadata(&md)?;
            debug!(id = %self.inner.id, axis_order = ?md.axis_order, "axis order extended");
            md
        };
        self.publish_event(&DatastoreEvent::SummaryMetadataChanged(amended));
        Ok(())
    }

    /// Set the summary metadata. Allowed once per datastore.
    pub fn set_summary_metadata(&self, metadata: SummaryMetadata) -> DatastoreResult<()> {
        {
            let mut lifecycle = self.lifecycle()?;
            if lifecycle.frozen {
                return Err(DatastoreError::Frozen);
            }
            if lifecycle.summary_set {
                return Err(DatastoreError::AlreadySet);
            }
            if let Some(storage) = self.storage() {
                storage.put_summary_metadata(&metadata)?;
            }
            lifecycle.summary_set = true;
        }
        debug!(id = %self.inner.id, "summary metadata set");
        self.publish_event(&DatastoreEvent::SummaryMetadataChanged(metadata));
        Ok(())
    }

    /// Freeze the datastore. Later calls do nothing.
    ///
    /// The storage is finalized once, on the first call. The frozen event is
    /// published even if finalizing fails; the error is then returned.
    pub fn freeze(&self) -> DatastoreResult<()> {
        let finalized = {
            let mut lifecycle = self.lifecycle()?;
            if lifecycle.frozen {
                return Ok(());
            }
            lifecycle.frozen = true;
            match self.storage() {
                Some(storage) => storage.finalize(),
                None => Ok(()),
            }
        };
        info!(id = %self.inner.id, "datastore frozen");
        self.publish_event(&DatastoreEvent::Frozen { store: self.clone() });
        if let Err(e) = finalized {
            error!(id = %self.inner.id, error = %e, "storage failed to finalize");
            return Err(e.into());
        }
        Ok(())
    }

    pub fn is_frozen(&self) -> DatastoreResult<bool> {
        Ok(self.lifecycle()?.frozen)
    }

    /// Record where this datastore was saved.
    pub fn set_save_path(&self, path: impl Into<PathBuf>) -> DatastoreResult<()> {
        let path = path.into();
        self.lifecycle()?.save_path = Some(path.clone());
        debug!(id = %self.inner.id, path = %path.display(), "save path set");
        self.publish_event(&DatastoreEvent::SavePathSet(path));
        Ok(())
    }

    pub fn save_path(&self) -> DatastoreResult<Option<PathBuf>> {
        Ok(self.lifecycle()?.save_path.clone())
    }

    /// Announce that this datastore is being discarded.
    ///
    /// Distinct from freezing; nothing is released here.
    pub fn close(&self) -> PublishReport {
        let channel = self
            .inner
            .closing
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match channel {
            Some(channel) => channel.announce(&ClosingEvent { store: self.clone() }),
            None => {
                debug!(id = %self.inner.id, "no closing channel attached");
                PublishReport::default()
            }
        }
    }

    /// Copy `other`'s summary metadata and every image into this datastore.
    ///
    /// `progress` is called with the running image count after each image.
    /// The first failure is logged and returned; images copied before it
    /// stay in place. Returns the number of images copied.
    pub fn copy_from(
        &self,
        other: &Datastore,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> DatastoreResult<usize> {
        let mut copied = 0;
        let result = (|| -> DatastoreResult<()> {
            if let Some(md) = other.summary_metadata()? {
                self.set_summary_metadata(md)?;
            }
            for coords in other.unordered_coords()? {
                let Some(image) = other.image(&coords)? else {
                    continue;
                };
                self.put_image(image)?;
                copied += 1;
                if let Some(report) = progress.as_deref_mut() {
                    report(copied);
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                debug!(id = %self.inner.id, from = %other.id(), copied, "datastore copied");
                Ok(copied)
            }
            Err(e) => {
                error!(id = %self.inner.id, from = %other.id(), copied, error = %e, "copy aborted");
                Err(e)
            }
        }
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("id", &self.inner.id)
            .field("listeners", &self.inner.bus.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_events::ListenerError;
    use acq_store::InMemoryStorage;
    use acq_types::{CHANNEL, TIME, Z};

    fn memory_store() -> Datastore {
        Datastore::new().with_storage(Arc::new(InMemoryStorage::new()))
    }

    fn image_at(coords: Coords, fill: u8) -> Image {
        Image::new(coords, 2, 2, 1, vec![fill; 4])
    }

    fn t(time: u32) -> Coords {
        Coords::builder().time(time).build()
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, name: &'static str) -> Arc<dyn Listener<DatastoreEvent>> {
        let log = Arc::clone(log);
        Arc::new(move |event: &DatastoreEvent| -> Result<(), ListenerError> {
            log.lock().unwrap().push(format!("{name}:{}", event.kind()));
            Ok(())
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    // -----------------------------------------------------------------------
    // put_image
    // -----------------------------------------------------------------------

    #[test]
    fn distinct_coords_never_cross_return() {
        let store = memory_store();
        let a = image_at(t(0), 1);
        let b = image_at(t(1), 2);
        store.put_image(a.clone()).unwrap();
        store.put_image(b.clone()).unwrap();

        assert_eq!(store.image(&t(0)).unwrap(), Some(a));
        assert_eq!(store.image(&t(1)).unwrap(), Some(b));
        assert_eq!(store.num_images().unwrap(), 2);
    }

    #[test]
    fn duplicate_put_keeps_first() {
        let store = memory_store();
        store.put_image(image_at(t(0), 1)).unwrap();
        let err = store.put_image(image_at(t(0), 2)).unwrap_err();
        assert!(matches!(err, DatastoreError::DuplicateCoordinate(c) if c == t(0)));
        assert_eq!(store.num_images().unwrap(), 1);
        assert_eq!(
            store.image(&t(0)).unwrap().unwrap().pixels.as_ref(),
            &[1, 1, 1, 1]
        );
    }

    #[test]
    fn put_after_freeze_fails_and_leaves_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = Datastore::new().with_storage(storage.clone());
        store.put_image(image_at(t(0), 0)).unwrap();
        store.freeze().unwrap();

        let err = store.put_image(image_at(t(1), 0)).unwrap_err();
        assert!(matches!(err, DatastoreError::Frozen));
        assert_eq!(storage.num_images().unwrap(), 1);
        assert!(storage.image(&t(1)).unwrap().is_none());
    }

    #[test]
    fn put_without_storage_fails() {
        let store = Datastore::new();
        let err = store.put_image(image_at(t(0), 0)).unwrap_err();
        assert!(matches!(err, DatastoreError::NoStorage));
    }

    #[test]
    fn unknown_axis_is_rejected() {
        let store = memory_store();
        store
            .put_image(image_at(Coords::builder().time(0).z(0).build(), 0))
            .unwrap();
        let err = store
            .put_image(image_at(Coords::builder().time(1).channel(0).build(), 0))
            .unwrap_err();
        match err {
            DatastoreError::InvalidAxis { axis, allowed } => {
                assert_eq!(axis, "channel");
                assert_eq!(allowed, vec![TIME, Z]);
            }
            other => panic!("expected InvalidAxis, got {other:?}"),
        }
    }

    #[test]
    fn rule_violations_are_rejections() {
        assert!(DatastoreError::AlreadySet.is_rejection());
        assert!(DatastoreError::InvalidAxis {
            axis: "x".into(),
            allowed: vec![]
        }
        .is_rejection());
        assert!(!DatastoreError::NoStorage.is_rejection());
        assert!(!DatastoreError::Store(StoreError::LockPoisoned).is_rejection());
    }

    #[test]
    fn subset_of_axes_is_allowed() {
        let store = memory_store();
        store
            .put_image(image_at(Coords::builder().time(0).z(0).build(), 0))
            .unwrap();
        store.put_image(image_at(t(1), 0)).unwrap();
        assert_eq!(store.num_images().unwrap(), 2);
    }

    #[test]
    fn declared_axes_widen_the_axis_check() {
        let store = memory_store();
        store.declare_axes(vec![TIME.into(), Z.into()]).unwrap();
        store.put_image(image_at(t(0), 0)).unwrap();
        store
            .put_image(image_at(Coords::builder().time(1).z(0).build(), 0))
            .unwrap();
        let err = store
            .put_image(image_at(Coords::builder().time(2).channel(0).build(), 0))
            .unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidAxis { axis, .. } if axis == CHANNEL));
    }

    // -----------------------------------------------------------------------
    // Axis order
    // -----------------------------------------------------------------------

    #[test]
    fn axis_order_follows_first_advance() {
        let store = memory_store();
        store.put_image(image_at(t(0), 0)).unwrap();
        store
            .put_image(image_at(Coords::builder().time(0).z(1).build(), 0))
            .unwrap();
        store.put_image(image_at(t(1), 0)).unwrap();

        let md = store.summary_metadata().unwrap().unwrap();
        assert_eq!(md.axis_order, vec![Z, TIME]);
    }

    #[test]
    fn axis_order_extends_explicit_summary() {
        let store = memory_store();
        store
            .set_summary_metadata(
                SummaryMetadata::default()
                    .with_name("run")
                    .with_axis_order(vec![TIME.to_string()]),
            )
            .unwrap();
        store
            .put_image(image_at(Coords::builder().time(2).z(3).build(), 0))
            .unwrap();

        let md = store.summary_metadata().unwrap().unwrap();
        assert_eq!(md.name.as_deref(), Some("run"));
        assert_eq!(md.axis_order, vec![TIME, Z]);
    }

    #[test]
    fn new_image_event_precedes_summary_change() {
        let store = memory_store();
        let log: Log = Arc::default();
        store.register_default(recorder(&log, "l"));

        store.put_image(image_at(t(0), 0)).unwrap();
        store.put_image(image_at(t(1), 0)).unwrap();
        assert_eq!(
            entries(&log),
            vec!["l:new_image", "l:new_image", "l:summary_metadata_changed"]
        );
    }

    // -----------------------------------------------------------------------
    // Summary metadata
    // -----------------------------------------------------------------------

    #[test]
    fn summary_set_once() {
        let store = memory_store();
        store
            .set_summary_metadata(SummaryMetadata::default().with_name("first"))
            .unwrap();
        let err = store
            .set_summary_metadata(SummaryMetadata::default().with_name("second"))
            .unwrap_err();
        assert!(matches!(err, DatastoreError::AlreadySet));
        assert_eq!(
            store.summary_metadata().unwrap().unwrap().name.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn summary_rejected_after_freeze() {
        let store = memory_store();
        store.freeze().unwrap();
        let err = store
            .set_summary_metadata(SummaryMetadata::default())
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Frozen));
    }

    #[test]
    fn summary_defaults_when_storage_has_none() {
        assert!(Datastore::new().summary_metadata().unwrap().is_none());
        assert_eq!(
            memory_store().summary_metadata().unwrap(),
            Some(SummaryMetadata::default())
        );
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn reads_without_storage_are_empty() {
        let store = Datastore::new();
        assert!(store.image(&t(0)).unwrap().is_none());
        assert!(store.any_image().unwrap().is_none());
        assert!(store.images_matching(&Coords::new()).unwrap().is_empty());
        assert!(store.unordered_coords().unwrap().is_empty());
        assert!(store.axes().unwrap().is_empty());
        assert_eq!(store.max_index(TIME).unwrap(), None);
        assert_eq!(store.max_indices().unwrap(), Coords::new());
        assert_eq!(store.num_images().unwrap(), 0);
    }

    #[test]
    fn axis_length_is_max_plus_one() {
        let store = memory_store();
        store
            .put_image(image_at(Coords::builder().time(4).z(0).build(), 0))
            .unwrap();
        assert_eq!(store.axis_length(TIME).unwrap(), 5);
        assert_eq!(store.axis_length(Z).unwrap(), 1);
        assert_eq!(store.axis_length("channel").unwrap(), 0);
        assert_eq!(
            store
                .images_matching(&Coords::builder().time(4).build())
                .unwrap()
                .len(),
            1
        );
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[test]
    fn lower_priority_listener_sees_image_first() {
        let store = memory_store();
        let log: Log = Arc::default();
        store.register(recorder(&log, "p20"), 20);
        store.register(recorder(&log, "p10"), 10);

        store.put_image(image_at(t(0), 0)).unwrap();
        assert_eq!(entries(&log), vec!["p10:new_image", "p20:new_image"]);
    }

    #[test]
    fn new_image_event_carries_store_and_image() {
        let store = memory_store();
        let seen: Arc<Mutex<Option<(Coords, bool)>>> = Arc::default();
        let (probe, expected) = (Arc::clone(&seen), store.clone());
        store.register_default(Arc::new(
            move |event: &DatastoreEvent| -> Result<(), ListenerError> {
                if let DatastoreEvent::NewImage { image, store } = event {
                    *probe.lock().unwrap() = Some((image.coords.clone(), store.same_as(&expected)));
                }
                Ok(())
            },
        ));
        store.put_image(image_at(t(3), 0)).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((t(3), true)));
    }

    #[test]
    fn failing_listener_does_not_fail_put() {
        let store = memory_store();
        let log: Log = Arc::default();
        store.register(
            Arc::new(|_: &DatastoreEvent| -> Result<(), ListenerError> {
                Err(ListenerError::failed("nope"))
            }),
            1,
        );
        store.register(recorder(&log, "after"), 2);
        store.put_image(image_at(t(0), 0)).unwrap();
        assert_eq!(entries(&log), vec!["after:new_image"]);
    }

    #[test]
    fn listener_may_read_back_during_delivery() {
        let store = memory_store();
        let counts: Arc<Mutex<Vec<usize>>> = Arc::default();
        let probe = Arc::clone(&counts);
        store.register_default(Arc::new(
            move |event: &DatastoreEvent| -> Result<(), ListenerError> {
                if let DatastoreEvent::NewImage { store, .. } = event {
                    let n = store
                        .num_images()
                        .map_err(|e| ListenerError::failed(e.to_string()))?;
                    probe.lock().unwrap().push(n);
                    // Lifecycle calls from a listener must not deadlock.
                    store
                        .save_path()
                        .map_err(|e| ListenerError::failed(e.to_string()))?;
                }
                Ok(())
            },
        ));
        store.put_image(image_at(t(0), 0)).unwrap();
        store.put_image(image_at(t(1), 0)).unwrap();
        assert_eq!(*counts.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unregistered_listener_hears_nothing() {
        let store = memory_store();
        let log: Log = Arc::default();
        let id = store.register_default(recorder(&log, "x"));
        assert!(store.unregister(id));
        assert!(!store.unregister(id));
        store.put_image(image_at(t(0), 0)).unwrap();
        assert!(entries(&log).is_empty());
    }

    // -----------------------------------------------------------------------
    // Freeze, save path, close
    // -----------------------------------------------------------------------

    #[test]
    fn freeze_is_idempotent_and_announced_once() {
        let store = memory_store();
        let log: Log = Arc::default();
        store.register_default(recorder(&log, "l"));
        assert!(!store.is_frozen().unwrap());

        store.freeze().unwrap();
        store.freeze().unwrap();
        assert!(store.is_frozen().unwrap());
        assert_eq!(entries(&log), vec!["l:frozen"]);
    }

    #[test]
    fn concurrent_freeze_publishes_once() {
        use std::thread;

        let store = memory_store();
        let log: Log = Arc::default();
        store.register_default(recorder(&log, "l"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.freeze().unwrap())
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(entries(&log), vec!["l:frozen"]);
    }

    #[test]
    fn save_path_is_recorded_and_announced() {
        let store = memory_store();
        let log: Log = Arc::default();
        store.register_default(recorder(&log, "l"));
        assert_eq!(store.save_path().unwrap(), None);

        store.set_save_path("/data/run1").unwrap();
        assert_eq!(store.save_path().unwrap(), Some(PathBuf::from("/data/run1")));
        assert_eq!(entries(&log), vec!["l:save_path_set"]);
    }

    #[test]
    fn close_announces_on_attached_channel() {
        let channel = ClosingChannel::new();
        let closed: Arc<Mutex<Vec<DatastoreId>>> = Arc::default();
        let probe = Arc::clone(&closed);
        channel.register_default(Arc::new(
            move |event: &ClosingEvent| -> Result<(), ListenerError> {
                probe.lock().unwrap().push(event.store.id());
                Ok(())
            },
        ));

        let store = memory_store().with_closing_channel(Arc::clone(&channel));
        assert_eq!(store.close().delivered, 1);
        assert_eq!(*closed.lock().unwrap(), vec![store.id()]);
        assert!(!store.is_frozen().unwrap());

        assert_eq!(memory_store().close().delivered, 0);
    }

    // -----------------------------------------------------------------------
    // copy_from
    // -----------------------------------------------------------------------

    #[test]
    fn copy_from_copies_everything_with_progress() {
        let source = memory_store();
        source
            .set_summary_metadata(SummaryMetadata::default().with_name("src"))
            .unwrap();
        for time in 0..3 {
            source.put_image(image_at(t(time), time as u8)).unwrap();
        }

        let dest = memory_store();
        let mut ticks = Vec::new();
        let mut progress = |n: usize| ticks.push(n);
        let copied = dest.copy_from(&source, Some(&mut progress)).unwrap();

        assert_eq!(copied, 3);
        assert_eq!(ticks, vec![1, 2, 3]);
        assert_eq!(dest.num_images().unwrap(), 3);
        assert_eq!(
            dest.summary_metadata().unwrap().unwrap().name.as_deref(),
            Some("src")
        );
    }

    #[test]
    fn copy_from_aborts_on_conflict() {
        let source = memory_store();
        source.put_image(image_at(t(0), 1)).unwrap();
        source.put_image(image_at(t(1), 1)).unwrap();

        let dest = memory_store();
        dest.put_image(image_at(t(0), 9)).unwrap();

        let err = dest.copy_from(&source, None).unwrap_err();
        assert!(matches!(err, DatastoreError::DuplicateCoordinate(_)));
        let kept = dest.image(&t(0)).unwrap().unwrap();
        assert_eq!(kept.pixels.as_ref(), &[9, 9, 9, 9]);
        assert_eq!(dest.images_matching(&t(0)).unwrap().len(), 1);
    }

    #[test]
    fn copy_into_frozen_store_fails() {
        let source = memory_store();
        source.put_image(image_at(t(0), 0)).unwrap();
        let dest = memory_store();
        dest.freeze().unwrap();
        assert!(matches!(
            dest.copy_from(&source, None),
            Err(DatastoreError::Frozen)
        ));
        assert_eq!(dest.num_images().unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_producers_at_distinct_coords() {
        use std::thread;

        let store = memory_store();
        let handles: Vec<_> = (0..4u32)
            .map(|channel| {
                let store = store.clone();
                thread::spawn(move || {
                    for time in 0..10u32 {
                        let c = Coords::builder().time(time).channel(channel).build();
                        store.put_image(image_at(c, 0)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(store.num_images().unwrap(), 40);
        let order = store.summary_metadata().unwrap().unwrap().axis_order;
        assert_eq!(order.len(), 2);
        assert!(order.contains(&TIME.to_string()));
        assert!(order.contains(&"channel".to_string()));
    }

    #[test]
    fn debug_format() {
        let store = memory_store();
        assert!(format!("{store:?}").contains("Datastore"));
    }
}
