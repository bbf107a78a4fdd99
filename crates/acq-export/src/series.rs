use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use acq_store::{Storage, StoreError, StoreResult};
use acq_types::{Coords, Image, SummaryMetadata};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ExportConfig, SyncMode};
use crate::frame::{read_frame, Frame, FrameRead};
use crate::index::PlaneIndex;

/// File extension of single-plane files.
pub const PLANE_EXTENSION: &str = "plane";

/// Name of the summary file inside a series directory.
pub const SUMMARY_FILE: &str = "metadata.json";

struct SeriesState {
    index: PlaneIndex<PathBuf>,
    summary: Option<SummaryMetadata>,
    writable: bool,
}

/// One file per image, plus a JSON summary, all in one directory.
///
/// Plane files are named after their coordinates
/// (`<prefix>_time-0003_z-0012.plane`) and hold a single image frame. Each file
/// is written to a temporary name and moved into place, so a crash never
/// leaves a half-written plane under its final name.
pub struct PlaneSeriesStorage {
    dir: PathBuf,
    config: ExportConfig,
    state: RwLock<SeriesState>,
}

impl PlaneSeriesStorage {
    /// Start a new series in `dir`, creating it if needed.
    ///
    /// Fails if `dir` already holds a series.
    pub fn create(dir: &Path, config: ExportConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        if dir.join(SUMMARY_FILE).exists() || !plane_files(dir)?.is_empty() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already holds a plane series", dir.display()),
            )));
        }
        info!(dir = %dir.display(), "plane series created");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            state: RwLock::new(SeriesState {
                index: PlaneIndex::new(),
                summary: None,
                writable: true,
            }),
        })
    }

    /// Open an existing series for reading.
    ///
    /// Plane files are indexed by the coordinates stored inside them, not by
    /// their names. Torn plane files are skipped with a warning.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let mut index = PlaneIndex::new();
        for path in plane_files(dir)? {
            let mut reader = BufReader::new(File::open(&path)?);
            match read_frame(&mut reader, &path)? {
                FrameRead::Frame(Frame::Image(image), _) => {
                    let coords = image.coords.clone();
                    if !index.insert(image.coords, path.clone()) {
                        warn!(%coords, path = %path.display(), "duplicate plane; keeping first");
                    }
                }
                FrameRead::Frame(_, _) => {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: "plane file holds no image".into(),
                    });
                }
                FrameRead::Eof | FrameRead::Truncated => {
                    warn!(path = %path.display(), "skipping incomplete plane file");
                }
            }
        }

        let summary_path = dir.join(SUMMARY_FILE);
        let summary = match fs::read_to_string(&summary_path) {
            Ok(json) => Some(Frame::parse_summary(&json, &summary_path)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if summary.is_none() && index.is_empty() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no plane series in {}", dir.display()),
            )));
        }

        debug!(images = index.len(), dir = %dir.display(), "plane series opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            config: ExportConfig::default(),
            state: RwLock::new(SeriesState {
                index,
                summary,
                writable: false,
            }),
        })
    }

    /// Directory holding the series.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name a plane at `coords` is written under.
    ///
    /// Distinct coordinates always get distinct names: bytes of an axis name
    /// other than ASCII letters and digits are written as `%XX`.
    pub fn plane_file_name(&self, coords: &Coords) -> String {
        let mut name = self.config.file_prefix.clone();
        for (axis, pos) in coords.iter() {
            name.push('_');
            for byte in axis.bytes() {
                if byte.is_ascii_alphanumeric() {
                    name.push(char::from(byte));
                } else {
                    name.push_str(&format!("%{byte:02X}"));
                }
            }
            name.push_str(&format!("-{pos:04}"));
        }
        name.push('.');
        name.push_str(PLANE_EXTENSION);
        name
    }

    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, SeriesState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, SeriesState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Write `bytes` to a temporary file in the series directory and move it
    /// to `target`. `replace` decides whether an existing target is an error.
    fn write_atomic(&self, target: &Path, bytes: &[u8], replace: bool) -> StoreResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        if self.config.sync == SyncMode::EveryWrite {
            tmp.as_file().sync_all()?;
        }
        if replace {
            tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
        } else {
            tmp.persist_noclobber(target)
                .map_err(|e| StoreError::Io(e.error))?;
        }
        Ok(())
    }
}

fn read_plane(path: &Path) -> StoreResult<Image> {
    let mut reader = BufReader::new(File::open(path)?);
    match read_frame(&mut reader, path)? {
        FrameRead::Frame(Frame::Image(image), _) => Ok(image),
        _ => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "plane file holds no image".into(),
        }),
    }
}

/// Every `.plane` file directly inside `dir`, sorted by name.
fn plane_files(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext == PLANE_EXTENSION)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

impl Storage for PlaneSeriesStorage {
    fn put_image(&self, image: &Image) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if !state.writable {
            return Err(StoreError::Finalized);
        }
        if state.index.contains(&image.coords) {
            return Err(StoreError::Occupied(image.coords.clone()));
        }
        let path = self.dir.join(self.plane_file_name(&image.coords));
        let bytes = Frame::Image(image.clone()).encode()?;
        self.write_atomic(&path, &bytes, false)?;
        debug!(coords = %image.coords, path = %path.display(), "plane written");
        state.index.insert(image.coords.clone(), path);
        Ok(())
    }

    fn image(&self, coords: &Coords) -> StoreResult<Option<Image>> {
        let path = self.read_state()?.index.get(coords).cloned();
        path.map(|p| read_plane(&p)).transpose()
    }

    fn any_image(&self) -> StoreResult<Option<Image>> {
        let path = self.read_state()?.index.any().cloned();
        path.map(|p| read_plane(&p)).transpose()
    }

    fn images_matching(&self, partial: &Coords) -> StoreResult<Vec<Image>> {
        let paths: Vec<PathBuf> = self
            .read_state()?
            .index
            .matching(partial)
            .into_iter()
            .cloned()
            .collect();
        paths.iter().map(|p| read_plane(p)).collect()
    }

    fn unordered_coords(&self) -> StoreResult<Vec<Coords>> {
        Ok(self.read_state()?.index.coords())
    }

    fn max_index(&self, axis: &str) -> StoreResult<Option<u32>> {
        Ok(self.read_state()?.index.max_index(axis))
    }

    fn max_indices(&self) -> StoreResult<Coords> {
        Ok(self.read_state()?.index.max_indices())
    }

    fn axes(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_state()?.index.axes())
    }

    fn num_images(&self) -> StoreResult<usize> {
        Ok(self.read_state()?.index.len())
    }

    fn summary_metadata(&self) -> StoreResult<Option<SummaryMetadata>> {
        Ok(self.read_state()?.summary.clone())
    }

    fn put_summary_metadata(&self, metadata: &SummaryMetadata) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if !state.writable {
            return Err(StoreError::Finalized);
        }
        let json = metadata
            .to_json()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&self.dir.join(SUMMARY_FILE), json.as_bytes(), true)?;
        state.summary = Some(metadata.clone());
        Ok(())
    }

    fn finalize(&self) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if !state.writable {
            return Ok(());
        }
        if self.config.sync == SyncMode::OnFinalize {
            let mut paths = state.index.coords();
            paths.sort();
            for coords in paths {
                if let Some(path) = state.index.get(&coords) {
                    File::open(path)?.sync_all()?;
                }
            }
        }
        state.writable = false;
        info!(images = state.index.len(), dir = %self.dir.display(), "plane series finalized");
        Ok(())
    }

    fn discard(&self) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if !state.writable {
            return Ok(());
        }
        state.writable = false;
        let mut removed = 0usize;
        for coords in state.index.coords() {
            if let Some(path) = state.index.get(&coords) {
                remove_if_present(path)?;
                removed += 1;
            }
        }
        if state.summary.is_some() {
            remove_if_present(&self.dir.join(SUMMARY_FILE))?;
        }
        state.index = PlaneIndex::new();
        state.summary = None;
        warn!(removed, dir = %self.dir.display(), "plane series discarded");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl std::fmt::Debug for PlaneSeriesStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.read_state().map(|s| s.index.len()).unwrap_or(0);
        f.debug_struct("PlaneSeriesStorage")
            .field("dir", &self.dir)
            .field("image_count", &count)
            .finish()
    }
}
