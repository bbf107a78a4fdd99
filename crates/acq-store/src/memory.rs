use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use acq_types::{Coords, Image, SummaryMetadata};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::Storage;

/// In-memory, HashMap-based image store.
///
/// The backing store for live acquisitions and for tests. All state is held
/// behind a `RwLock`; images are cloned on read and write, which is cheap
/// because pixel buffers are reference-counted.
pub struct InMemoryStorage {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    images: HashMap<Coords, Image>,
    max_indices: BTreeMap<String, u32>,
    summary: Option<SummaryMetadata>,
}

impl InMemoryStorage {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn put_image(&self, image: &Image) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if state.images.contains_key(&image.coords) {
            return Err(StoreError::Occupied(image.coords.clone()));
        }
        for (axis, pos) in image.coords.iter() {
            let max = state.max_indices.entry(axis.to_string()).or_insert(pos);
            *max = (*max).max(pos);
        }
        state.images.insert(image.coords.clone(), image.clone());
        debug!(coords = %image.coords, count = state.images.len(), "image stored in memory");
        Ok(())
    }

    fn image(&self, coords: &Coords) -> StoreResult<Option<Image>> {
        Ok(self.read_state()?.images.get(coords).cloned())
    }

    fn any_image(&self) -> StoreResult<Option<Image>> {
        Ok(self.read_state()?.images.values().next().cloned())
    }

    fn images_matching(&self, partial: &Coords) -> StoreResult<Vec<Image>> {
        let state = self.read_state()?;
        Ok(state
            .images
            .iter()
            .filter(|(coords, _)| coords.matches(partial))
            .map(|(_, img)| img.clone())
            .collect())
    }

    fn unordered_coords(&self) -> StoreResult<Vec<Coords>> {
        // Keys compare by position only, so return the stored image's own
        // coords to keep terminal-axis markers.
        Ok(self
            .read_state()?
            .images
            .values()
            .map(|img| img.coords.clone())
            .collect())
    }

    fn max_index(&self, axis: &str) -> StoreResult<Option<u32>> {
        Ok(self.read_state()?.max_indices.get(axis).copied())
    }

    fn max_indices(&self) -> StoreResult<Coords> {
        let state = self.read_state()?;
        Ok(state
            .max_indices
            .iter()
            .fold(Coords::builder(), |b, (axis, &max)| b.index(axis.clone(), max))
            .build())
    }

    fn axes(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_state()?.max_indices.keys().cloned().collect())
    }

    fn num_images(&self) -> StoreResult<usize> {
        Ok(self.read_state()?.images.len())
    }

    fn summary_metadata(&self) -> StoreResult<Option<SummaryMetadata>> {
        Ok(self.read_state()?.summary.clone())
    }

    fn put_summary_metadata(&self, metadata: &SummaryMetadata) -> StoreResult<()> {
        self.write_state()?.summary = Some(metadata.clone());
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.read_state().map(|s| s.images.len()).unwrap_or(0);
        f.debug_struct("InMemoryStorage")
            .field("image_count", &count)
            .finish()
    }
}
