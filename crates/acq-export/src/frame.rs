use std::io::{self, Read};
use std::path::Path;

use acq_store::{StoreError, StoreResult};
use acq_types::{Image, SummaryMetadata};
use serde::{Deserialize, Serialize};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: u32 = 1 << 30;

/// One unit of an export file.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Frame)]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// A stored image.
    Image(Image),
    /// Summary metadata as JSON. Later summary frames supersede earlier ones.
    Summary(String),
    /// Written when the store is finalized.
    End { images: u64 },
}

/// Result of reading one frame from a stream.
#[derive(Debug)]
pub enum FrameRead {
    /// A complete, CRC-valid frame and its total on-disk length.
    Frame(Frame, u64),
    /// Clean end of stream at a frame boundary.
    Eof,
    /// The stream ended partway through a frame (an interrupted write).
    Truncated,
}

impl Frame {
    /// Summary frame for `metadata`.
    pub fn summary(metadata: &SummaryMetadata) -> StoreResult<Self> {
        let json = metadata
            .to_json()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::Summary(json))
    }

    /// Encode with length and CRC framing.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| StoreError::Serialization(format!("frame too large: {} bytes", payload.len())))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Parse the summary carried by a summary frame.
    pub fn parse_summary(json: &str, path: &Path) -> StoreResult<SummaryMetadata> {
        SummaryMetadata::from_json(json).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("bad summary metadata: {e}"),
        })
    }
}

/// Read the next frame from `reader`.
///
/// `path` is only used to label errors. A CRC mismatch or undecodable
/// payload is [`StoreError::Corrupt`]; running out of bytes mid-frame is
/// [`FrameRead::Truncated`] so callers can decide how to treat a torn tail.
pub fn read_frame<R: Read>(reader: &mut R, path: &Path) -> StoreResult<FrameRead> {
    let mut header = [0u8; HEADER_SIZE];
    match fill(reader, &mut header)? {
        0 => return Ok(FrameRead::Eof),
        n if n < HEADER_SIZE => return Ok(FrameRead::Truncated),
        _ => {}
    }

    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length == 0 || length > MAX_FRAME_LEN {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("invalid frame length {length}"),
        });
    }

    let mut payload = vec![0u8; length as usize];
    if fill(reader, &mut payload)? < payload.len() {
        return Ok(FrameRead::Truncated);
    }

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }

    let frame = bincode::deserialize(&payload).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("undecodable frame: {e}"),
    })?;
    Ok(FrameRead::Frame(frame, (HEADER_SIZE + payload.len()) as u64))
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
