//! Lazy, mutation-aware access to game map containers.
//!
//! This crate opens container files (`.bsp`), reads their lump directory
//! and resolves each lump into a [`LazyLump`]: a randomly indexable view
//! that decodes records on demand and keeps edits in an overlay until the
//! lump is materialized. Resolution runs the same pipeline for every entry:
//!
//! - **External segments**: prefer a sibling `<container>.<id:04x>.bsp_lump` file
//! - **Compression**: unwrap the `"LZMA"` payload header when the entry is tagged
//! - **Schema dispatch**: pick a record layout by lump id and version
//! - **Lazy view**: typed records, or raw bytes when no layout applies
//!
//! Game lumps are opened as a [`NestedDirectory`], which runs the pipeline
//! again for each child.
//!
//! # Example
//!
//! ```rust,ignore
//! use lumpkit_formats::branches;
//! use lumpkit_storage::{Container, LoadOptions};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let branch = Arc::new(branches::valve_source()?);
//! let container = Container::open("maps/test.bsp", branch, LoadOptions::default())?;
//! let planes = container.resolve_entry(1)?;
//! println!("{} planes", planes.lump.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_wrap)] // Index arithmetic mirrors Python slices
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains

use lumpkit_formats::header::HeaderError;
use lumpkit_formats::layout::LayoutError;
use lumpkit_formats::lzma::CompressionError;
use std::path::PathBuf;
use thiserror::Error;

// Shared byte sources
pub mod source;

// Load options
pub mod config;

// Compression adapter
pub mod compression;

// External lump files
pub mod external;

// Lazy lump views
pub mod lump;

// Game lump directories
pub mod nested;

// Container directory and resolution pipeline
pub mod container;

pub use config::LoadOptions;
pub use container::{
    Container, Directory, Entry, ErrorLog, Loaded, Resolution, open_container,
    open_nested_directory, resolve_entry,
};
pub use lump::{LazyLump, LumpElement, LumpError, Slice};
pub use nested::{ChildLump, NestedDirectory};
pub use external::{ExternalSegmentResolver, SegmentOrigin};
pub use source::{ByteSource, Segment};

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Problems found while resolving one entry.
///
/// Some are recoverable (the entry still loads, degraded) and end up in an
/// [`ErrorLog`]; others exclude the entry and are returned as `Err`.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No layout for this version; the entry loads as raw bytes.
    #[error("{entry}: version {version} has no layout (known: {known:?})")]
    UnsupportedVersion {
        /// Entry name
        entry: String,
        /// Entry version
        version: u32,
        /// Versions that do have a layout
        known: Vec<u32>,
    },

    /// Entry length is not a whole number of records; the entry loads as raw bytes.
    #[error("{entry}: {length} bytes is not a multiple of the {record_size} byte {layout} record")]
    RecordSizeMismatch {
        /// Entry name
        entry: String,
        /// Layout name
        layout: String,
        /// Entry length in bytes
        length: u64,
        /// Record size
        record_size: usize,
    },

    /// External file exists but could not be read; the internal range is used.
    #[error("{entry}: external file {} unavailable: {source}", path.display())]
    ExternalSegmentUnavailable {
        /// Entry name
        entry: String,
        /// External file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Decompressed length differs from the length the directory announced.
    #[error("{entry}: decompressed {actual} bytes, expected {expected}")]
    DecompressionSizeMismatch {
        /// Entry name
        entry: String,
        /// Announced length
        expected: usize,
        /// Produced length
        actual: usize,
    },

    /// Compressed payload could not be decoded.
    #[error("{entry}: {source}")]
    Compression {
        /// Entry name
        entry: String,
        /// Codec error
        source: CompressionError,
    },

    /// Compressed child shorter than its payload header; exposed as empty.
    #[error("{entry}: compressed payload of {length} bytes is shorter than its header")]
    EmptyCompressed {
        /// Entry name
        entry: String,
        /// Payload length
        length: u64,
    },

    /// Child compression flag disagrees with the payload.
    #[error("{entry}: compression flag is {flagged} but payload compressed is {detected}")]
    CompressionFlagMismatch {
        /// Entry name
        entry: String,
        /// Flag in the child header
        flagged: bool,
        /// Magic found in the payload
        detected: bool,
    },

    /// A record failed to decode.
    #[error("{entry}: record {index} failed to decode: {cause}")]
    RecordDecodeError {
        /// Entry name
        entry: String,
        /// Record index
        index: usize,
        /// Decode failure
        cause: LayoutError,
    },

    /// Entry range lies outside its source.
    #[error("{entry}: range {offset}+{length} exceeds source length {available}")]
    OutOfBounds {
        /// Entry name
        entry: String,
        /// Entry offset
        offset: u64,
        /// Entry length
        length: u64,
        /// Source length
        available: u64,
    },

    /// Nested directory could not be parsed.
    #[error("{entry}: invalid nested directory: {source}")]
    NestedDirectory {
        /// Entry name
        entry: String,
        /// Header error
        source: HeaderError,
    },

    /// I/O error while reading the entry.
    #[error("{entry}: I/O error: {source}")]
    Io {
        /// Entry name
        entry: String,
        /// Underlying error
        source: std::io::Error,
    },
}

impl LoadError {
    /// Name of the entry this error belongs to.
    pub fn entry(&self) -> &str {
        match self {
            Self::UnsupportedVersion { entry, .. }
            | Self::RecordSizeMismatch { entry, .. }
            | Self::ExternalSegmentUnavailable { entry, .. }
            | Self::DecompressionSizeMismatch { entry, .. }
            | Self::Compression { entry, .. }
            | Self::EmptyCompressed { entry, .. }
            | Self::CompressionFlagMismatch { entry, .. }
            | Self::RecordDecodeError { entry, .. }
            | Self::OutOfBounds { entry, .. }
            | Self::NestedDirectory { entry, .. }
            | Self::Io { entry, .. } => entry,
        }
    }

    /// Whether the entry was excluded rather than degraded.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DecompressionSizeMismatch { .. }
                | Self::Compression { .. }
                | Self::OutOfBounds { .. }
                | Self::NestedDirectory { .. }
                | Self::Io { .. }
        )
    }

    /// Map a codec error onto the entry it occurred in.
    pub(crate) fn from_compression(entry: &str, error: CompressionError) -> Self {
        match error {
            CompressionError::DecompressionSizeMismatch { expected, actual } => {
                Self::DecompressionSizeMismatch {
                    entry: entry.to_string(),
                    expected,
                    actual,
                }
            }
            CompressionError::Io(source) => Self::Io {
                entry: entry.to_string(),
                source,
            },
            source => Self::Compression {
                entry: entry.to_string(),
                source,
            },
        }
    }
}

/// Errors that can occur while opening, resolving or saving containers.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or directory could not be read.
    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    /// Entry id outside the directory.
    #[error("entry {id} not in directory of {count} entries")]
    UnknownEntry {
        /// Requested id
        id: u32,
        /// Directory size
        count: usize,
    },

    /// Branch has no nested directory format.
    #[error("branch {0} has no nested directory")]
    NoNestedFormat(String),

    /// Entry could not be resolved.
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Lump access failed.
    #[error("lump error: {0}")]
    Lump(#[from] LumpError),

    /// Record could not be encoded.
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Binary parsing error.
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Container too large for 32-bit directory offsets.
    #[error("container exceeds 4 GiB at entry {0}")]
    TooLarge(String),

    /// Save target is the file the container is read from.
    #[error("cannot save over the open container {}", .0.display())]
    SaveOverSource(PathBuf),
}

/// Version information for the storage crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
