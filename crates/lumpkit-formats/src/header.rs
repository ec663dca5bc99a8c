//! Container and game lump headers
//!
//! A container starts with a magic, a format version and a fixed-length
//! directory of [`LumpHeader`] slots. Valve stores the map revision after
//! the directory, Respawn before it. Game lumps carry their own small
//! directory of [`ChildLumpHeader`]s closed by a terminator header.

use binrw::io::{Cursor, Read, Seek, SeekFrom, Write};
use binrw::{BinRead, BinWrite, Endian};
use std::fmt;
use thiserror::Error;

/// Errors raised while reading or writing container headers
#[derive(Debug, Error)]
pub enum HeaderError {
    /// File does not start with the branch's magic
    #[error("invalid container magic: expected {expected:02X?}, got {actual:02X?}")]
    InvalidMagic {
        /// Magic of the branch
        expected: [u8; 4],
        /// Bytes found in the file
        actual: [u8; 4],
    },

    /// Header or directory extends past the available data
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        /// Structure being read
        what: &'static str,
        /// Bytes required
        needed: u64,
        /// Bytes available
        available: u64,
    },

    /// Directory does not match the container format
    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for header operations
pub type HeaderResult<T> = Result<T, HeaderError>;

/// One directory slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct LumpHeader {
    /// Absolute offset of the lump data
    pub offset: u32,
    /// Length in bytes as stored (compressed length for compressed lumps)
    pub length: u32,
    /// Lump format version
    pub version: u32,
    /// Decompressed length, zero when uncompressed
    pub compression_tag: u32,
}

impl LumpHeader {
    /// Encoded size
    pub const SIZE: usize = 16;

    /// Whether the slot points at no data
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the lump is stored compressed
    pub const fn is_compressed(&self) -> bool {
        self.compression_tag != 0
    }
}

/// One game lump directory header
///
/// Formats without an explicit length read with `with_length = false`.
/// The terminator header has an all-zero id and only its offset matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
#[br(import(with_length: bool))]
pub struct ChildLumpHeader {
    /// Four byte id, reversed on little-endian branches
    pub id: [u8; 4],
    /// Bit 0 marks an LZMA compressed child
    pub flags: u16,
    /// Child format version
    pub version: u16,
    /// Offset of the child data
    pub offset: i32,
    /// Explicit length, absent in some formats
    #[br(if(with_length))]
    pub length: Option<i32>,
}

impl ChildLumpHeader {
    /// Compressed flag bit
    pub const FLAG_COMPRESSED: u16 = 0x0001;

    /// Encoded size
    pub const fn size(with_length: bool) -> usize {
        if with_length { 16 } else { 12 }
    }

    /// Terminator header at `offset`
    pub fn terminator(offset: i32, with_length: bool) -> Self {
        Self {
            id: [0; 4],
            flags: 0,
            version: 0,
            offset,
            length: with_length.then_some(0),
        }
    }

    /// Child name as displayed, `"prps"` on disk becomes `"sprp"` when reversed
    pub fn name(&self, reverse: bool) -> String {
        let mut id = self.id;
        if reverse {
            id.reverse();
        }
        String::from_utf8_lossy(&id).into_owned()
    }

    /// On-disk id for a display name
    pub fn id_from_name(name: &str, reverse: bool) -> [u8; 4] {
        let mut id = [0u8; 4];
        for (slot, byte) in id.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        if reverse {
            id.reverse();
        }
        id
    }

    /// Whether the compressed flag is set
    pub const fn flags_compressed(&self) -> bool {
        self.flags & Self::FLAG_COMPRESSED != 0
    }
}

/// How game lump child offsets are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetBase {
    /// Relative to the start of the game lump
    LumpRelative,
    /// Absolute within the container file
    FileAbsolute,
}

/// Layout of a branch's nested game lump directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedFormat {
    /// Lump id holding the nested directory
    pub entry_id: u32,
    /// Whether child headers carry an explicit length
    pub with_length: bool,
    /// Offset interpretation
    pub offset_base: OffsetBase,
    /// Whether child ids are stored byte-reversed
    pub reverse_ids: bool,
    /// Whether an extra `u32` follows the child count (Dark Messiah single player)
    pub extra_word: bool,
}

impl NestedFormat {
    /// Size of one child header
    pub const fn header_size(&self) -> usize {
        ChildLumpHeader::size(self.with_length)
    }

    /// Bytes before the first child header
    pub const fn prefix_size(&self) -> usize {
        if self.extra_word { 8 } else { 4 }
    }

    /// Bytes taken by `count` headers and the prefix
    pub const fn directory_size(&self, count: usize) -> usize {
        self.prefix_size() + count * self.header_size()
    }

    /// The word stored after the child count, for formats that have one
    pub fn read_extra_word(&self, data: &[u8]) -> HeaderResult<Option<u32>> {
        if !self.extra_word {
            return Ok(None);
        }
        match data.get(4..8) {
            Some(word) => Ok(Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))),
            None => Err(HeaderError::Truncated {
                what: "game lump prefix",
                needed: 8,
                available: data.len() as u64,
            }),
        }
    }

    /// Read the child count and every header, terminator included
    ///
    /// The count on disk includes the terminator, which is always the last
    /// header returned.
    pub fn read_headers(&self, data: &[u8]) -> HeaderResult<Vec<ChildLumpHeader>> {
        let mut cursor = Cursor::new(data);
        if data.len() < 4 {
            return Err(HeaderError::Truncated {
                what: "game lump count",
                needed: 4,
                available: data.len() as u64,
            });
        }
        let count = u32::read_le(&mut cursor)? as u64;
        if count == 0 {
            return Err(HeaderError::InvalidDirectory(
                "game lump directory has no terminator".to_string(),
            ));
        }
        let needed = self.prefix_size() as u64 + count * self.header_size() as u64;
        if needed > data.len() as u64 {
            return Err(HeaderError::Truncated {
                what: "game lump directory",
                needed,
                available: data.len() as u64,
            });
        }
        cursor.set_position(self.prefix_size() as u64);
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(ChildLumpHeader::read_le_args(&mut cursor, (self.with_length,))?);
        }
        Ok(headers)
    }

    /// Write the count and headers, terminator included
    ///
    /// Formats with an extra word get a zero; see [`write_directory`](Self::write_directory).
    pub fn write_headers<W: Write + Seek>(
        &self,
        writer: &mut W,
        headers: &[ChildLumpHeader],
    ) -> HeaderResult<()> {
        self.write_directory(writer, headers, 0)
    }

    /// Write the count, the extra word if the format has one, and the headers
    pub fn write_directory<W: Write + Seek>(
        &self,
        writer: &mut W,
        headers: &[ChildLumpHeader],
        extra_word: u32,
    ) -> HeaderResult<()> {
        (headers.len() as u32).write_le(writer)?;
        if self.extra_word {
            extra_word.write_le(writer)?;
        }
        for header in headers {
            let mut header = *header;
            header.length = if self.with_length {
                Some(header.length.unwrap_or_default())
            } else {
                None
            };
            header.write_le(writer)?;
        }
        Ok(())
    }
}

/// How the version field after the magic is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionEncoding {
    /// Plain `u32`
    Single,
    /// Major in the low half, minor in the high half once the value exceeds `0xFFFF`
    Split,
}

impl VersionEncoding {
    /// Interpret a raw version field
    pub const fn decode(self, raw: u32) -> ContainerVersion {
        match self {
            Self::Split if raw > 0xFFFF => ContainerVersion::Split {
                major: (raw & 0xFFFF) as u16,
                minor: (raw >> 16) as u16,
            },
            _ => ContainerVersion::Single(raw),
        }
    }
}

/// Container format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerVersion {
    /// Plain version number
    Single(u32),
    /// `major.minor` version
    Split {
        /// Major version
        major: u16,
        /// Minor version
        minor: u16,
    },
}

impl ContainerVersion {
    /// Raw on-disk value
    pub const fn raw(self) -> u32 {
        match self {
            Self::Single(v) => v,
            Self::Split { major, minor } => (major as u32) | ((minor as u32) << 16),
        }
    }

    /// Major version
    pub const fn major(self) -> u32 {
        match self {
            Self::Single(v) => v,
            Self::Split { major, .. } => major as u32,
        }
    }
}

impl fmt::Display for ContainerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => write!(f, "{v}"),
            Self::Split { major, minor } => write!(f, "{major}.{minor}"),
        }
    }
}

/// Fixed header layout of one container family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFormat {
    /// File magic
    pub magic: [u8; 4],
    /// Version field interpretation
    pub version_encoding: VersionEncoding,
    /// Offset of the first directory slot
    pub directory_offset: u64,
    /// Number of directory slots
    pub entry_count: usize,
    /// Offset of the `u32` map revision, if the format stores one
    pub revision_offset: Option<u64>,
}

impl ContainerFormat {
    /// Total header length, directory included
    pub fn header_size(&self) -> u64 {
        let directory_end = self.directory_offset + (self.entry_count * LumpHeader::SIZE) as u64;
        match self.revision_offset {
            Some(revision) => directory_end.max(revision + 4),
            None => directory_end,
        }
    }
}

/// Parsed container header
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    /// Format version
    pub version: ContainerVersion,
    /// Map revision
    pub revision: Option<u32>,
    /// Directory slots in id order
    pub entries: Vec<LumpHeader>,
    /// Header bytes outside the directory, kept verbatim for rewriting
    raw: Vec<u8>,
}

impl ContainerHeader {
    /// Read and validate a container header
    pub fn read<R: Read + Seek>(reader: &mut R, format: &ContainerFormat) -> HeaderResult<Self> {
        let available = reader.seek(SeekFrom::End(0))?;
        let header_size = format.header_size();
        if available < header_size {
            return Err(HeaderError::Truncated {
                what: "container header",
                needed: header_size,
                available,
            });
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut raw = vec![0u8; header_size as usize];
        reader.read_exact(&mut raw)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        if magic != format.magic {
            return Err(HeaderError::InvalidMagic {
                expected: format.magic,
                actual: magic,
            });
        }

        let mut cursor = Cursor::new(&raw);
        cursor.seek(SeekFrom::Start(4))?;
        let version = format.version_encoding.decode(u32::read_le(&mut cursor)?);

        let revision = match format.revision_offset {
            Some(offset) => {
                cursor.seek(SeekFrom::Start(offset))?;
                Some(u32::read_le(&mut cursor)?)
            }
            None => None,
        };

        cursor.seek(SeekFrom::Start(format.directory_offset))?;
        let mut entries = Vec::with_capacity(format.entry_count);
        for _ in 0..format.entry_count {
            entries.push(LumpHeader::read_options(&mut cursor, Endian::Little, ())?);
        }

        Ok(Self {
            version,
            revision,
            entries,
            raw,
        })
    }

    /// Header for a new container, every slot empty
    pub fn new(format: &ContainerFormat, version: ContainerVersion, revision: Option<u32>) -> Self {
        let mut raw = vec![0u8; format.header_size() as usize];
        raw[..4].copy_from_slice(&format.magic);
        Self {
            version,
            revision,
            entries: vec![LumpHeader::default(); format.entry_count],
            raw,
        }
    }

    /// Serialize the header, replacing version, revision and directory
    pub fn write<W: Write + Seek>(&self, writer: &mut W, format: &ContainerFormat) -> HeaderResult<()> {
        if self.entries.len() != format.entry_count {
            return Err(HeaderError::InvalidDirectory(format!(
                "{} entries for a {} slot directory",
                self.entries.len(),
                format.entry_count
            )));
        }
        let mut cursor = Cursor::new(self.raw.clone());
        cursor.seek(SeekFrom::Start(0))?;
        cursor.write_all(&format.magic)?;
        self.version.raw().write_le(&mut cursor)?;
        cursor.seek(SeekFrom::Start(format.directory_offset))?;
        for entry in &self.entries {
            entry.write_options(&mut cursor, Endian::Little, ())?;
        }
        if let (Some(offset), Some(revision)) = (format.revision_offset, self.revision) {
            cursor.seek(SeekFrom::Start(offset))?;
            revision.write_le(&mut cursor)?;
        }
        writer.write_all(&cursor.into_inner())?;
        Ok(())
    }
}
