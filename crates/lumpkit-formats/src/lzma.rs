//! Compressed lump payloads
//!
//! Compressed lumps and game lump children start with a 17 byte header:
//!
//! ```text
//! "LZMA"  actual_size:u32le  lzma_size:u32le  properties:[u8; 5]
//! ```
//!
//! followed by a raw LZMA stream of `lzma_size` bytes. This is the standard
//! `.lzma` header with the fields reordered and the 64-bit size cut down, so
//! decoding rebuilds a standard header in front of the stream and hands the
//! result to `lzma-rs`.

use binrw::io::{Cursor, Read};
use binrw::{BinRead, BinWrite};
use lzma_rs::compress::{Options as CompressOptions, UnpackedSize as CompressedSizeMode};
use lzma_rs::decompress::{Options as DecompressOptions, UnpackedSize};
use thiserror::Error;

/// Payload magic
pub const LZMA_MAGIC: [u8; 4] = *b"LZMA";

/// Maximum allowed decompression size (1 GB)
///
/// Rejects headers announcing absurd sizes before any allocation happens.
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Errors raised by the payload codec
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Payload does not start with `"LZMA"`
    #[error("invalid compressed payload magic: expected [4C 5A 4D 41], got {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// Payload too short to contain its header
    #[error("compressed payload of {0} bytes is shorter than its header")]
    Truncated(usize),

    /// Decompressed length differs from the announced length
    #[error("decompressed {actual} bytes, expected {expected}")]
    DecompressionSizeMismatch {
        /// Length announced by the header
        expected: usize,
        /// Length produced
        actual: usize,
    },

    /// Announced size exceeds the configured limit
    #[error("decompressed size {size} exceeds limit {limit}")]
    TooLarge {
        /// Announced size
        size: usize,
        /// Active limit
        limit: usize,
    },

    /// Decoder or encoder failure
    #[error("LZMA error: {0}")]
    Lzma(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for compression operations
pub type CompressionResult<T> = Result<T, CompressionError>;

/// Header in front of every compressed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"LZMA")]
pub struct LzmaHeader {
    /// Decompressed size
    pub actual_size: u32,
    /// Size of the LZMA stream after the header
    pub lzma_size: u32,
    /// lc/lp/pb byte followed by the dictionary size
    pub properties: [u8; 5],
}

impl LzmaHeader {
    /// Encoded size, magic included
    pub const SIZE: usize = 17;

    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> CompressionResult<Self> {
        if data.len() < Self::SIZE {
            return Err(CompressionError::Truncated(data.len()));
        }
        if data[..4] != LZMA_MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&data[..4]);
            return Err(CompressionError::InvalidMagic(magic));
        }
        Ok(Self::read(&mut Cursor::new(&data[..Self::SIZE]))?)
    }

    /// Dictionary size stored in the properties
    pub fn dict_size(&self) -> u32 {
        u32::from_le_bytes([
            self.properties[1],
            self.properties[2],
            self.properties[3],
            self.properties[4],
        ])
    }

    /// Standard `.lzma` header: properties then the 64-bit unpacked size
    fn standard_header(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[..5].copy_from_slice(&self.properties);
        out[5..].copy_from_slice(&u64::from(self.actual_size).to_le_bytes());
        out
    }
}

/// Whether `data` starts with the payload magic
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == LZMA_MAGIC
}

/// Decompress a payload using [`MAX_DECOMPRESSION_SIZE`]
pub fn decompress(data: &[u8]) -> CompressionResult<Vec<u8>> {
    decompress_with_limit(data, MAX_DECOMPRESSION_SIZE)
}

/// Decompress a payload, rejecting announced sizes above `limit`
///
/// The output is exactly `actual_size` bytes or the call fails with
/// [`CompressionError::DecompressionSizeMismatch`]. A stream cut short of
/// its announced `lzma_size` reports the mismatch as well.
pub fn decompress_with_limit(data: &[u8], limit: usize) -> CompressionResult<Vec<u8>> {
    let header = LzmaHeader::parse(data)?;
    let expected = header.actual_size as usize;
    if expected > limit {
        return Err(CompressionError::TooLarge {
            size: expected,
            limit,
        });
    }

    let body = &data[LzmaHeader::SIZE..];
    let declared = header.lzma_size as usize;
    let truncated = body.len() < declared;
    let stream = &body[..body.len().min(declared)];

    let standard = header.standard_header();
    let mut input = (&standard[..]).chain(stream);
    let mut out = Vec::with_capacity(expected);
    let options = DecompressOptions {
        unpacked_size: UnpackedSize::ReadFromHeader,
        ..DecompressOptions::default()
    };
    if let Err(e) = lzma_rs::lzma_decompress_with_options(&mut input, &mut out, &options) {
        if truncated {
            return Err(CompressionError::DecompressionSizeMismatch {
                expected,
                actual: out.len(),
            });
        }
        return Err(CompressionError::Lzma(e.to_string()));
    }

    if out.len() != expected {
        return Err(CompressionError::DecompressionSizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Compress `data` into a payload with the 17 byte header
pub fn compress(data: &[u8]) -> CompressionResult<Vec<u8>> {
    let actual_size = u32::try_from(data.len()).map_err(|_| CompressionError::TooLarge {
        size: data.len(),
        limit: u32::MAX as usize,
    })?;
    let mut standard = Vec::new();
    let options = CompressOptions {
        unpacked_size: CompressedSizeMode::WriteToHeader(Some(data.len() as u64)),
    };
    lzma_rs::lzma_compress_with_options(&mut Cursor::new(data), &mut standard, &options)?;
    if standard.len() < 13 {
        return Err(CompressionError::Lzma(format!(
            "encoder produced {} bytes, shorter than its header",
            standard.len()
        )));
    }

    let mut properties = [0u8; 5];
    properties.copy_from_slice(&standard[..5]);
    let stream = &standard[13..];
    let header = LzmaHeader {
        actual_size,
        lzma_size: stream.len() as u32,
        properties,
    };

    let mut out = Cursor::new(Vec::with_capacity(LzmaHeader::SIZE + stream.len()));
    header.write(&mut out)?;
    let mut out = out.into_inner();
    out.extend_from_slice(stream);
    Ok(out)
}
