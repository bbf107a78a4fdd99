use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::coords::Coords;

/// One acquired plane, keyed by its [`Coords`].
///
/// The pixel buffer is opaque: nothing in acqstore interprets it. `Bytes`
/// makes clones cheap, so handing an image to storage and to every event
/// listener does not copy pixel data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Where this image sits in the acquisition.
    pub coords: Coords,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per pixel (1 for 8-bit, 2 for 16-bit, 4 for RGB32).
    pub bytes_per_pixel: u8,
    /// Raw pixel data.
    pub pixels: Bytes,
    /// Per-image key/value metadata (exposure, camera, timestamps, ...).
    pub metadata: BTreeMap<String, String>,
}

impl Image {
    /// Create an image with no per-image metadata.
    pub fn new(
        coords: Coords,
        width: u32,
        height: u32,
        bytes_per_pixel: u8,
        pixels: impl Into<Bytes>,
    ) -> Self {
        Self {
            coords,
            width,
            height,
            bytes_per_pixel,
            pixels: pixels.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The same image placed at different coordinates.
    pub fn copy_at(&self, coords: Coords) -> Self {
        Self {
            coords,
            ..self.clone()
        }
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}
