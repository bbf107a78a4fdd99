use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use acq_store::{Storage, StoreError, StoreResult};
use acq_types::{Coords, Image, SummaryMetadata};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ExportConfig, SyncMode};
use crate::frame::{read_frame, Frame, FrameRead};
use crate::index::PlaneIndex;

/// File extension of image stack files.
pub const STACK_EXTENSION: &str = "acqstack";

const STACK_MAGIC: &[u8; 4] = b"ACQS";
const STACK_VERSION: u32 = 1;
/// Magic + version.
const STACK_HEADER_LEN: u64 = 8;

/// Where one frame sits in the stack file.
#[derive(Clone, Copy, Debug)]
struct FrameLoc {
    offset: u64,
    len: u64,
}

struct StackState {
    file: File,
    /// Offset the next frame is written at.
    end: u64,
    index: PlaneIndex<FrameLoc>,
    summary: Option<SummaryMetadata>,
    /// Cleared by `finalize`, and never set on stacks opened for reading.
    writable: bool,
    /// An end frame has been written or was found on open.
    complete: bool,
}

/// Single-file, multi-plane image stack.
///
/// Layout: `ACQS`, a little-endian `u32` version, then a sequence of
/// [`Frame`]s. Images and summary updates are appended as they arrive, so a
/// stack is readable while it is being written; `finalize` appends an end
/// frame and syncs the file. A stack without an end frame was interrupted
/// mid-export; opening one logs a warning and serves whatever is intact.
pub struct StackFileStorage {
    path: PathBuf,
    config: ExportConfig,
    state: Mutex<StackState>,
}

impl StackFileStorage {
    /// Create a new stack file `<prefix>.acqstack` inside `dir`.
    ///
    /// Refuses to overwrite an existing stack.
    pub fn create(dir: &Path, config: ExportConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{STACK_EXTENSION}", config.file_prefix));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(STACK_MAGIC)?;
        file.write_all(&STACK_VERSION.to_le_bytes())?;

        info!(path = %path.display(), "image stack created");
        Ok(Self {
            path,
            config,
            state: Mutex::new(StackState {
                file,
                end: STACK_HEADER_LEN,
                index: PlaneIndex::new(),
                summary: None,
                writable: true,
                complete: false,
            }),
        })
    }

    /// Open an existing stack for reading.
    ///
    /// `path` may name the stack file itself or the directory holding it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let path = find_stack_file(path)?;
        let mut reader = BufReader::new(File::open(&path)?);

        let mut header = [0u8; STACK_HEADER_LEN as usize];
        reader.read_exact(&mut header).map_err(|_| StoreError::Corrupt {
            path: path.clone(),
            reason: "missing stack header".into(),
        })?;
        if &header[..4] != STACK_MAGIC {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("bad magic {:?}", String::from_utf8_lossy(&header[..4])),
            });
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != STACK_VERSION {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("unsupported stack version {version}"),
            });
        }

        let mut index = PlaneIndex::new();
        let mut summary = None;
        let mut complete = false;
        let mut offset = STACK_HEADER_LEN;
        loop {
            match read_frame(&mut reader, &path)? {
                FrameRead::Frame(frame, len) => {
                    match frame {
                        Frame::Image(image) => {
                            let coords = image.coords.clone();
                            if !index.insert(image.coords, FrameLoc { offset, len }) {
                                warn!(%coords, path = %path.display(), "duplicate image in stack; keeping first");
                            }
                        }
                        Frame::Summary(json) => {
                            summary = Some(Frame::parse_summary(&json, &path)?);
                        }
                        Frame::End { images } => {
                            if images != index.len() as u64 {
                                warn!(expected = images, found = index.len(), "stack image count mismatch");
                            }
                            complete = true;
                        }
                    }
                    offset += len;
                }
                FrameRead::Eof => break,
                FrameRead::Truncated => {
                    warn!(offset, path = %path.display(), "truncated frame at end of stack");
                    break;
                }
            }
        }
        if !complete {
            warn!(path = %path.display(), "stack has no end frame; export was interrupted");
        }

        debug!(images = index.len(), path = %path.display(), "image stack opened");
        Ok(Self {
            path,
            config: ExportConfig::default(),
            state: Mutex::new(StackState {
                file: reader.into_inner(),
                end: offset,
                index,
                summary,
                writable: false,
                complete,
            }),
        })
    }

    /// Path of the stack file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` once the stack carries an end frame.
    pub fn is_complete(&self) -> bool {
        self.lock().map(|s| s.complete).unwrap_or(false)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StackState>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn append(&self, state: &mut StackState, frame: &Frame) -> StoreResult<FrameLoc> {
        let bytes = frame.encode()?;
        state.file.seek(SeekFrom::Start(state.end))?;
        state.file.write_all(&bytes)?;
        if self.config.sync == SyncMode::EveryWrite {
            state.file.sync_data()?;
        }
        let loc = FrameLoc {
            offset: state.end,
            len: bytes.len() as u64,
        };
        state.end += loc.len;
        Ok(loc)
    }

    fn read_image(&self, state: &mut StackState, loc: FrameLoc) -> StoreResult<Image> {
        state.file.seek(SeekFrom::Start(loc.offset))?;
        let mut frame_bytes = (&state.file).take(loc.len);
        match read_frame(&mut frame_bytes, &self.path)? {
            FrameRead::Frame(Frame::Image(image), _) => Ok(image),
            _ => Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("no image frame at offset {}", loc.offset),
            }),
        }
    }
}

impl Storage for StackFileStorage {
    fn put_image(&self, image: &Image) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.writable {
            return Err(StoreError::Finalized);
        }
        if state.index.contains(&image.coords) {
            return Err(StoreError::Occupied(image.coords.clone()));
        }
        let loc = self.append(&mut state, &Frame::Image(image.clone()))?;
        state.index.insert(image.coords.clone(), loc);
        debug!(coords = %image.coords, offset = loc.offset, "image appended to stack");
        Ok(())
    }

    fn image(&self, coords: &Coords) -> StoreResult<Option<Image>> {
        let mut state = self.lock()?;
        match state.index.get(coords).copied() {
            Some(loc) => self.read_image(&mut state, loc).map(Some),
            None => Ok(None),
        }
    }

    fn any_image(&self) -> StoreResult<Option<Image>> {
        let mut state = self.lock()?;
        match state.index.any().copied() {
            Some(loc) => self.read_image(&mut state, loc).map(Some),
            None => Ok(None),
        }
    }

    fn images_matching(&self, partial: &Coords) -> StoreResult<Vec<Image>> {
        let mut state = self.lock()?;
        let locs: Vec<FrameLoc> = state.index.matching(partial).into_iter().copied().collect();
        locs.into_iter()
            .map(|loc| self.read_image(&mut state, loc))
            .collect()
    }

    fn unordered_coords(&self) -> StoreResult<Vec<Coords>> {
        Ok(self.lock()?.index.coords())
    }

    fn max_index(&self, axis: &str) -> StoreResult<Option<u32>> {
        Ok(self.lock()?.index.max_index(axis))
    }

    fn max_indices(&self) -> StoreResult<Coords> {
        Ok(self.lock()?.index.max_indices())
    }

    fn axes(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.index.axes())
    }

    fn num_images(&self) -> StoreResult<usize> {
        Ok(self.lock()?.index.len())
    }

    fn summary_metadata(&self) -> StoreResult<Option<SummaryMetadata>> {
        Ok(self.lock()?.summary.clone())
    }

    fn put_summary_metadata(&self, metadata: &SummaryMetadata) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.writable {
            return Err(StoreError::Finalized);
        }
        self.append(&mut state, &Frame::summary(metadata)?)?;
        state.summary = Some(metadata.clone());
        Ok(())
    }

    fn finalize(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.writable {
            return Ok(());
        }
        let images = state.index.len() as u64;
        self.append(&mut state, &Frame::End { images })?;
        state.file.sync_all()?;
        state.writable = false;
        state.complete = true;
        info!(images, path = %self.path.display(), "image stack finalized");
        Ok(())
    }

    fn discard(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.writable {
            return Ok(());
        }
        state.writable = false;
        state.index = PlaneIndex::new();
        state.summary = None;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        warn!(path = %self.path.display(), "image stack discarded");
        Ok(())
    }
}

impl std::fmt::Debug for StackFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.lock().map(|s| s.index.len()).unwrap_or(0);
        f.debug_struct("StackFileStorage")
            .field("path", &self.path)
            .field("image_count", &count)
            .finish()
    }
}

/// Resolve `path` to a stack file: the path itself if it is one, otherwise
/// the first `.acqstack` file (by name) directly inside it.
fn find_stack_file(path: &Path) -> StoreResult<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        let candidate = entry.path();
        if entry.file_type().is_file()
            && candidate.extension().is_some_and(|ext| ext == STACK_EXTENSION)
        {
            return Ok(candidate.to_path_buf());
        }
    }
    Err(StoreError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no .{STACK_EXTENSION} file in {}", path.display()),
    )))
}
