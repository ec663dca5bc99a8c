//! Game lump directories
//!
//! One top-level entry (the game lump) holds a directory of its own:
//! `count: u32`, then `count` [`ChildLumpHeader`]s, the last of which is a
//! terminator. Each child runs through compression detection and schema
//! dispatch independently of its siblings.

use crate::LoadError;
use crate::compression::{CompressionAdapter, Payload};
use crate::config::LoadOptions;
use crate::lump::{LazyLump, LumpResult};
use crate::source::Segment;
use lumpkit_formats::header::{ChildLumpHeader, HeaderError, NestedFormat, OffsetBase};
use lumpkit_formats::schema::SchemaRegistry;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::{debug, warn};

/// One resolved child of a nested directory
#[derive(Debug, Clone)]
pub struct ChildLump {
    /// Display name, e.g. `"sprp"`
    pub name: String,
    /// Header as read from disk
    pub header: ChildLumpHeader,
    /// Lazy view over the (decompressed) child bytes
    pub lump: LazyLump,
    /// Whether the stored bytes were compressed
    pub compressed: bool,
}

/// Parsed game lump
#[derive(Debug)]
pub struct NestedDirectory {
    entry: String,
    format: NestedFormat,
    extra_word: Option<u32>,
    children: Vec<ChildLump>,
    errors: BTreeMap<String, Vec<LoadError>>,
}

impl NestedDirectory {
    /// Parse the directory held in `parent`
    ///
    /// `origin` is the offset the parent entry was declared at; file-absolute
    /// child offsets are rebased on it. Problems with a single child are
    /// recorded in [`errors`](Self::errors) and never fail the directory.
    pub fn parse(
        entry: &str,
        parent: &Segment,
        origin: u64,
        format: &NestedFormat,
        registry: &SchemaRegistry,
        options: &LoadOptions,
    ) -> Result<Self, LoadError> {
        let (extra_word, headers) = read_headers(entry, parent, format)?;
        let Some((_terminator, real)) = headers.split_last() else {
            return Err(LoadError::NestedDirectory {
                entry: entry.to_string(),
                source: HeaderError::InvalidDirectory("empty game lump directory".to_string()),
            });
        };

        let rebase = |offset: i32| -> Option<u64> {
            let offset = u64::try_from(offset).ok()?;
            match format.offset_base {
                OffsetBase::LumpRelative => Some(offset),
                OffsetBase::FileAbsolute => offset.checked_sub(origin),
            }
        };

        let adapter = CompressionAdapter::new(options.max_decompressed_size);
        let mut directory = Self {
            entry: entry.to_string(),
            format: *format,
            extra_word,
            children: Vec::with_capacity(real.len()),
            errors: BTreeMap::new(),
        };

        for (i, header) in real.iter().enumerate() {
            let name = header.name(format.reverse_ids);
            let key = format!("{entry}.{name}");
            let start = rebase(header.offset);
            let length = match header.length {
                Some(length) => u64::try_from(length).ok(),
                None => match real.get(i + 1) {
                    Some(next) => rebase(next.offset).zip(start).and_then(|(n, s)| n.checked_sub(s)),
                    // last real child runs to the end of the parent
                    None => start.and_then(|s| parent.len().checked_sub(s)),
                },
            };
            let segment = start
                .zip(length)
                .and_then(|(start, length)| parent.slice(start, length));
            let Some(segment) = segment else {
                warn!(
                    "{}: offset {} length {:?} outside the {} byte game lump",
                    key,
                    header.offset,
                    header.length,
                    parent.len()
                );
                directory.record(
                    &name,
                    LoadError::OutOfBounds {
                        entry: key,
                        offset: i64::from(header.offset) as u64,
                        length: length.unwrap_or_default(),
                        available: parent.len(),
                    },
                );
                continue;
            };

            match resolve_child(&key, &name, header, segment, &adapter, registry, options) {
                Ok((child, issues)) => {
                    for issue in issues {
                        directory.record(&name, issue);
                    }
                    directory.children.push(child);
                }
                Err(e) => {
                    warn!("{}: excluded: {}", key, e);
                    directory.record(&name, e);
                }
            }
        }

        debug!(
            "{}: {} children, {} with problems",
            entry,
            directory.children.len(),
            directory.errors.len()
        );
        Ok(directory)
    }

    fn record(&mut self, child: &str, error: LoadError) {
        self.errors.entry(child.to_string()).or_default().push(error);
    }

    /// Name of the entry holding this directory
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Directory layout
    pub const fn format(&self) -> &NestedFormat {
        &self.format
    }

    /// Word stored after the child count, for formats that have one
    pub const fn extra_word(&self) -> Option<u32> {
        self.extra_word
    }

    /// Children in directory order
    pub fn children(&self) -> &[ChildLump] {
        &self.children
    }

    /// Child names in directory order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.name.as_str())
    }

    /// Child by name
    pub fn get(&self, name: &str) -> Option<&ChildLump> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Mutable child by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ChildLump> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Number of loaded children, terminator excluded
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no child loaded
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Problems per child name
    pub const fn errors(&self) -> &BTreeMap<String, Vec<LoadError>> {
        &self.errors
    }

    /// Take the problems, leaving none behind
    pub fn take_errors(&mut self) -> BTreeMap<String, Vec<LoadError>> {
        std::mem::take(&mut self.errors)
    }

    /// Serialize the directory and every child
    ///
    /// `base` is the offset the game lump will be written at; it is only
    /// used by file-absolute formats. Children are written materialized and
    /// uncompressed, followed by a terminator pointing past the last child.
    pub fn to_bytes(&self, base: u64) -> LumpResult<Vec<u8>> {
        let count = self.children.len() + 1;
        let header_bytes = self.format.directory_size(count);
        let mut cursor = match self.format.offset_base {
            OffsetBase::LumpRelative => 0,
            OffsetBase::FileAbsolute => base,
        } + header_bytes as u64;

        let mut headers = Vec::with_capacity(count);
        let mut data = Vec::new();
        for child in &self.children {
            let bytes = child.lump.materialize()?;
            let mut header = child.header;
            header.flags &= !ChildLumpHeader::FLAG_COMPRESSED;
            header.offset = to_offset(cursor)?;
            header.length = self
                .format
                .with_length
                .then(|| to_offset(bytes.len() as u64))
                .transpose()?;
            cursor += bytes.len() as u64;
            headers.push(header);
            data.extend_from_slice(&bytes);
        }
        headers.push(ChildLumpHeader::terminator(
            to_offset(cursor)?,
            self.format.with_length,
        ));

        let mut out = Cursor::new(Vec::with_capacity(header_bytes + data.len()));
        self.format
            .write_directory(&mut out, &headers, self.extra_word.unwrap_or_default())
            .map_err(|e| match e {
                HeaderError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            })?;
        let mut out = out.into_inner();
        out.extend_from_slice(&data);
        Ok(out)
    }
}

fn to_offset(value: u64) -> std::io::Result<i32> {
    i32::try_from(value).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("game lump offset {value} exceeds i32"),
        )
    })
}

fn read_headers(
    entry: &str,
    parent: &Segment,
    format: &NestedFormat,
) -> Result<(Option<u32>, Vec<ChildLumpHeader>), LoadError> {
    let io_error = |source| LoadError::Io {
        entry: entry.to_string(),
        source,
    };
    let header_error = |source| LoadError::NestedDirectory {
        entry: entry.to_string(),
        source,
    };
    if parent.len() < 4 {
        return Err(header_error(HeaderError::Truncated {
            what: "game lump count",
            needed: 4,
            available: parent.len(),
        }));
    }
    let count = parent.read(0, 4).map_err(io_error)?;
    let count = u32::from_le_bytes([count[0], count[1], count[2], count[3]]) as u64;
    let needed = (format.prefix_size() as u64 + count * format.header_size() as u64).min(parent.len());
    let bytes = parent.read(0, needed as usize).map_err(io_error)?;
    let extra_word = format.read_extra_word(&bytes).map_err(header_error)?;
    let headers = format.read_headers(&bytes).map_err(header_error)?;
    Ok((extra_word, headers))
}

fn resolve_child(
    key: &str,
    name: &str,
    header: &ChildLumpHeader,
    segment: Segment,
    adapter: &CompressionAdapter,
    registry: &SchemaRegistry,
    options: &LoadOptions,
) -> Result<(ChildLump, Vec<LoadError>), LoadError> {
    let mut issues = Vec::new();
    let detected = CompressionAdapter::is_compressed(&segment)
        .map_err(|e| LoadError::from_compression(key, e))?;
    let flagged = header.flags_compressed();
    if flagged != detected {
        warn!(
            "{}: compression flag is {} but payload compressed is {}",
            key, flagged, detected
        );
        issues.push(LoadError::CompressionFlagMismatch {
            entry: key.to_string(),
            flagged,
            detected,
        });
    }

    let length = segment.len();
    let payload = adapter
        .decode_detected(segment)
        .map_err(|e| LoadError::from_compression(key, e))?;
    if matches!(payload, Payload::Empty) {
        warn!("{}: compressed payload of {} bytes has no room for its header", key, length);
        issues.push(LoadError::EmptyCompressed {
            entry: key.to_string(),
            length,
        });
    }
    let compressed = payload.was_compressed();

    let dispatch = registry.dispatch_child(name, u32::from(header.version));
    let (lump, issue) =
        LazyLump::dispatched(key, payload.into_segment(), dispatch, u32::from(header.version));
    issues.extend(issue);
    let child = ChildLump {
        name: name.to_string(),
        header: *header,
        lump: lump.with_strict(options.strict),
        compressed,
    };
    Ok((child, issues))
}
