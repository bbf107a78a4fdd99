use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use acq_export::{ExportConfig, PlaneSeriesStorage, StackFileStorage};
use acq_store::Storage;
use acq_types::{Coords, SummaryMetadata, STAGE_POSITION};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::DatastoreConfig;
use crate::datastore::Datastore;
use crate::error::{DatastoreError, DatastoreResult};
use crate::prefs::{preferred_save_mode, set_preferred_save_mode, PreferenceStore};

/// On-disk format for an exported datastore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Every image in one multi-plane file.
    StackFile,
    /// One file per image.
    PlaneSeries,
}

impl SaveMode {
    pub const ALL: [SaveMode; 2] = [SaveMode::StackFile, SaveMode::PlaneSeries];

    /// Name shown to users and stored as the saved preference.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::StackFile => "Image Stack File",
            Self::PlaneSeries => "Separate Image Files",
        }
    }

    /// Name used on the command line.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::StackFile => "stack",
            Self::PlaneSeries => "series",
        }
    }

    fn create_storage(self, path: &Path, config: ExportConfig) -> DatastoreResult<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self {
            Self::StackFile => Arc::new(StackFileStorage::create(path, config)?),
            Self::PlaneSeries => Arc::new(PlaneSeriesStorage::create(path, config)?),
        };
        Ok(storage)
    }

    fn open_storage(self, path: &Path) -> DatastoreResult<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self {
            Self::StackFile => Arc::new(StackFileStorage::open(path)?),
            Self::PlaneSeries => Arc::new(PlaneSeriesStorage::open(path)?),
        };
        Ok(storage)
    }
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SaveMode {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| s == mode.display_name() || s.eq_ignore_ascii_case(mode.short_name()))
            .ok_or_else(|| DatastoreError::UnsupportedMode(s.to_string()))
    }
}

/// Where to save, as picked by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveTarget {
    pub mode: SaveMode,
    pub path: PathBuf,
}

/// Asks the user where and how to save.
///
/// Implemented by whatever UI hosts the datastore; tests use a canned answer.
pub trait SaveTargetChooser {
    /// Returns `None` if the user cancelled.
    fn choose_target(&self, suggested_mode: SaveMode, suggested_path: Option<&Path>) -> Option<SaveTarget>;
}

impl Datastore {
    /// Export this datastore to `path` in the given format.
    ///
    /// On success both this datastore and the returned copy are frozen, and
    /// this datastore's save path is `path`. On failure the error is logged
    /// and returned, the save path is left alone, and whatever the export
    /// had written is removed so the save can be retried at the same path.
    /// This datastore may already be frozen by then.
    pub fn save(&self, mode: SaveMode, path: impl AsRef<Path>) -> DatastoreResult<Datastore> {
        let path = path.as_ref();
        match self.save_to(mode, path) {
            Ok(saved) => {
                info!(id = %self.id(), %mode, path = %path.display(), "datastore saved");
                Ok(saved)
            }
            Err(e) => {
                error!(id = %self.id(), %mode, path = %path.display(), error = %e, "save failed");
                Err(e)
            }
        }
    }

    fn save_to(&self, mode: SaveMode, path: &Path) -> DatastoreResult<Datastore> {
        let summary = self.export_summary()?;

        let mut export = self.config().export.clone();
        if let Some(prefix) = &summary.prefix {
            export.file_prefix = prefix.clone();
        }
        let storage = mode.create_storage(path, export)?;
        let saved = Datastore::with_config(self.config().clone()).with_storage(Arc::clone(&storage));

        let written = self.replay_into(&saved, summary).and_then(|()| {
            self.freeze()?;
            saved.set_save_path(path)?;
            saved.freeze()
        });
        if let Err(e) = written {
            if let Err(cleanup) = storage.discard() {
                warn!(path = %path.display(), error = %cleanup, "could not remove partial export");
            }
            return Err(e);
        }
        self.set_save_path(path)?;
        Ok(saved)
    }

    /// Copy the summary and every image into the empty `target`, ordered by
    /// stage position.
    fn replay_into(&self, target: &Datastore, summary: SummaryMetadata) -> DatastoreResult<()> {
        // Images may use a subset of the axes, and the first one replayed
        // must not narrow what the target accepts.
        target.declare_axes(self.axes()?)?;
        target.set_summary_metadata(summary).map_err(flag_internal)?;

        let mut coords = self.unordered_coords()?;
        coords.sort_by(|a, b| {
            a.index(STAGE_POSITION)
                .cmp(&b.index(STAGE_POSITION))
                .then_with(|| a.cmp(b))
        });
        for c in &coords {
            if let Some(image) = self.image(c)? {
                target.put_image(image).map_err(flag_internal)?;
            }
        }
        debug!(id = %self.id(), images = coords.len(), "images replayed into export");
        Ok(())
    }

    /// Summary to export: the current one, with intended dimensions filled
    /// in from the stored extent when absent.
    fn export_summary(&self) -> DatastoreResult<SummaryMetadata> {
        let summary = self.summary_metadata()?.unwrap_or_default();
        if summary.intended_dimensions.is_some() {
            return Ok(summary);
        }
        let mut dims = Coords::builder();
        for axis in self.axes()? {
            let length = self.axis_length(&axis)?;
            dims = dims.index(axis, length);
        }
        Ok(summary.with_intended_dimensions(dims.build()))
    }

    /// Ask `chooser` for a target and save there.
    ///
    /// The preferred mode is offered as the suggestion and the chosen mode
    /// becomes the new preference. Returns `Ok(None)` if the user cancelled.
    pub fn save_interactive(
        &self,
        chooser: &dyn SaveTargetChooser,
        prefs: &dyn PreferenceStore,
    ) -> DatastoreResult<Option<Datastore>> {
        let suggested = preferred_save_mode(prefs).unwrap_or(SaveMode::StackFile);
        let current = self.save_path()?;
        let Some(target) = chooser.choose_target(suggested, current.as_deref()) else {
            debug!(id = %self.id(), "save cancelled");
            return Ok(None);
        };
        set_preferred_save_mode(prefs, target.mode);
        self.save(target.mode, &target.path).map(Some)
    }

    /// Open a saved datastore for reading.
    ///
    /// The result is frozen and carries `path` as its save path.
    pub fn load(mode: SaveMode, path: impl AsRef<Path>) -> DatastoreResult<Datastore> {
        Self::load_with_config(mode, path, DatastoreConfig::default())
    }

    /// [`load`](Self::load) with an explicit configuration, which later
    /// saves of the loaded datastore use.
    pub fn load_with_config(
        mode: SaveMode,
        path: impl AsRef<Path>,
        config: DatastoreConfig,
    ) -> DatastoreResult<Datastore> {
        let path = path.as_ref();
        let storage = mode.open_storage(path)?;
        let loaded = Datastore::with_config(config).with_storage(storage);
        loaded.freeze()?;
        loaded.set_save_path(path)?;
        info!(id = %loaded.id(), %mode, path = %path.display(), "datastore loaded");
        Ok(loaded)
    }
}

/// The export target starts empty and unfrozen, so write rejections there
/// point at a bug rather than bad input.
fn flag_internal(e: DatastoreError) -> DatastoreError {
    if e.is_rejection() {
        error!(error = %e, "export target rejected a write; this is a bug");
    }
    e
}
