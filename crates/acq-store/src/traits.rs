use acq_types::{Coords, Image, SummaryMetadata};

use crate::error::StoreResult;

/// Keeper of image bytes and summary metadata.
///
/// All implementations must satisfy these invariants:
/// - At most one image per coordinate. `put_image` on an occupied coordinate
///   fails with [`StoreError::Occupied`](crate::StoreError::Occupied) and
///   leaves the stored image in place.
/// - Coordinates compare by position only (see [`Coords`]).
/// - Concurrent reads are always safe.
/// - The store never interprets pixel data.
/// - All I/O errors are propagated, never silently ignored.
pub trait Storage: Send + Sync {
    /// Store an image keyed by its coordinate.
    fn put_image(&self, image: &Image) -> StoreResult<()>;

    /// Exact-match lookup.
    ///
    /// Returns `Ok(None)` if no image is stored at `coords`.
    fn image(&self, coords: &Coords) -> StoreResult<Option<Image>>;

    /// Some stored image, or `None` if the store is empty. Used to sniff
    /// image format (size, depth) without knowing any coordinate.
    fn any_image(&self) -> StoreResult<Option<Image>>;

    /// Every image whose coordinate agrees with `partial` on each axis that
    /// `partial` defines.
    fn images_matching(&self, partial: &Coords) -> StoreResult<Vec<Image>>;

    /// All stored coordinates, in no particular order.
    fn unordered_coords(&self) -> StoreResult<Vec<Coords>>;

    /// Largest position seen along `axis`, or `None` if no stored image
    /// uses it.
    fn max_index(&self, axis: &str) -> StoreResult<Option<u32>>;

    /// Largest position seen along every axis.
    fn max_indices(&self) -> StoreResult<Coords>;

    /// Every axis used by a stored image, in name order. Empty when no image
    /// has been stored yet.
    fn axes(&self) -> StoreResult<Vec<String>>;

    /// Number of stored images.
    fn num_images(&self) -> StoreResult<usize>;

    /// The recorded summary metadata, if any.
    fn summary_metadata(&self) -> StoreResult<Option<SummaryMetadata>>;

    /// Record summary metadata, replacing any previous value.
    ///
    /// Write-once rules belong to the datastore; a backend always accepts
    /// the latest summary.
    fn put_summary_metadata(&self, metadata: &SummaryMetadata) -> StoreResult<()>;

    /// Called once when the owning datastore freezes.
    ///
    /// File-backed stores flush and write trailers here. The default does
    /// nothing.
    fn finalize(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Remove whatever this store has written, for an export that was
    /// abandoned part way. Stores that were opened rather than created keep
    /// their data. The default does nothing.
    fn discard(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Returns `true` if an image is stored at `coords`.
    fn contains(&self, coords: &Coords) -> StoreResult<bool> {
        Ok(self.image(coords)?.is_some())
    }
}
