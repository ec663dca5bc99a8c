//! Compression adapter
//!
//! Top-level entries announce compression through the directory's
//! `compression_tag` (the decompressed length, zero when stored plain).
//! Game lump children carry no tag and are recognized by the `"LZMA"`
//! magic. Either way the result is a [`Segment`] over the plain bytes.

use crate::source::Segment;
use lumpkit_formats::lzma::{self, CompressionError, CompressionResult, LZMA_MAGIC, LzmaHeader};
use tracing::debug;

/// Result of looking at a possibly compressed payload
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes were stored plain
    Plain(Segment),
    /// Bytes were decompressed into memory
    Decompressed(Segment),
    /// Payload announced compression but is too short to hold its header
    Empty,
}

impl Payload {
    /// Segment over the plain bytes, empty for [`Payload::Empty`]
    pub fn into_segment(self) -> Segment {
        match self {
            Self::Plain(segment) | Self::Decompressed(segment) => segment,
            Self::Empty => Segment::empty(),
        }
    }

    /// Whether decompression took place
    pub const fn was_compressed(&self) -> bool {
        matches!(self, Self::Decompressed(_))
    }
}

/// Decompresses entry payloads within a size limit
#[derive(Debug, Clone, Copy)]
pub struct CompressionAdapter {
    limit: usize,
}

impl Default for CompressionAdapter {
    fn default() -> Self {
        Self::new(lzma::MAX_DECOMPRESSION_SIZE)
    }
}

impl CompressionAdapter {
    /// Adapter rejecting decompressed sizes above `limit`
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Decode a top-level entry according to its directory tag
    ///
    /// The decompressed length must equal `compression_tag`.
    pub fn decode_entry(&self, segment: Segment, compression_tag: u32) -> CompressionResult<Payload> {
        if compression_tag == 0 {
            return Ok(Payload::Plain(segment));
        }
        let payload = self.decompress(&segment)?;
        if let Payload::Decompressed(plain) = &payload {
            if plain.len() != u64::from(compression_tag) {
                return Err(CompressionError::DecompressionSizeMismatch {
                    expected: compression_tag as usize,
                    actual: plain.len() as usize,
                });
            }
        }
        Ok(payload)
    }

    /// Decode a payload that may start with the `"LZMA"` magic
    pub fn decode_detected(&self, segment: Segment) -> CompressionResult<Payload> {
        if Self::is_compressed(&segment)? {
            self.decompress(&segment)
        } else {
            Ok(Payload::Plain(segment))
        }
    }

    /// Whether the segment starts with the payload magic
    pub fn is_compressed(segment: &Segment) -> CompressionResult<bool> {
        if segment.len() < LZMA_MAGIC.len() as u64 {
            return Ok(false);
        }
        let magic = segment.read(0, LZMA_MAGIC.len())?;
        Ok(lzma::is_compressed(&magic))
    }

    fn decompress(&self, segment: &Segment) -> CompressionResult<Payload> {
        if segment.len() < LzmaHeader::SIZE as u64 {
            return Ok(Payload::Empty);
        }
        let compressed = segment.read_all()?;
        let plain = lzma::decompress_with_limit(&compressed, self.limit)?;
        debug!(
            "Decompressed {} bytes into {} bytes",
            compressed.len(),
            plain.len()
        );
        Ok(Payload::Decompressed(Segment::from_bytes(plain)))
    }
}
