//! Byte sources shared by lazy lumps
//!
//! A [`ByteSource`] is either an open file or an in-memory buffer (used for
//! decompressed lumps). Clones share the same handle. A [`Segment`] is a
//! window onto a source.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Shared handle to bytes on disk or in memory
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Open file, read with seek + read
    File {
        /// Shared file handle
        file: Rc<RefCell<File>>,
        /// Path the file was opened from
        path: PathBuf,
        /// File length at open time
        len: u64,
    },
    /// In-memory buffer
    Memory(Rc<[u8]>),
}

impl ByteSource {
    /// Open a file for reading
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let len = metadata.len();
        Ok(Self::File {
            file: Rc::new(RefCell::new(file)),
            path: path.to_path_buf(),
            len,
        })
    }

    /// Wrap an in-memory buffer
    pub fn from_bytes(bytes: impl Into<Rc<[u8]>>) -> Self {
        Self::Memory(bytes.into())
    }

    /// Total length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(bytes) => bytes.len() as u64,
        }
    }

    /// Whether the source holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of a file source
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Memory(_) => None,
        }
    }

    /// Fill `buf` from `offset`; reading past the end is an `UnexpectedEof` error
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.len()) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {offset} exceeds source length {}",
                    buf.len(),
                    self.len()
                ),
            ));
        }
        match self {
            Self::File { file, .. } => {
                let mut file = file.borrow_mut();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
            Self::Memory(bytes) => {
                let start = offset as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                Ok(())
            }
        }
    }

    /// Whether two handles share the same underlying storage
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::File { file: a, .. }, Self::File { file: b, .. }) => Rc::ptr_eq(a, b),
            (Self::Memory(a), Self::Memory(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A byte range of a [`ByteSource`]
#[derive(Debug, Clone)]
pub struct Segment {
    source: ByteSource,
    offset: u64,
    length: u64,
}

impl Segment {
    /// Window of `length` bytes starting at `offset`
    pub const fn new(source: ByteSource, offset: u64, length: u64) -> Self {
        Self {
            source,
            offset,
            length,
        }
    }

    /// Whole source
    pub fn whole(source: ByteSource) -> Self {
        let length = source.len();
        Self::new(source, 0, length)
    }

    /// Segment over an owned buffer
    pub fn from_bytes(bytes: impl Into<Rc<[u8]>>) -> Self {
        Self::whole(ByteSource::from_bytes(bytes))
    }

    /// Empty segment
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Underlying source
    pub const fn source(&self) -> &ByteSource {
        &self.source
    }

    /// Absolute offset within the source
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes
    pub const fn len(&self) -> u64 {
        self.length
    }

    /// Whether the segment is empty
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the whole range lies within the source
    pub fn in_bounds(&self) -> bool {
        self.offset
            .checked_add(self.length)
            .is_some_and(|end| end <= self.source.len())
    }

    /// Read `len` bytes at `offset` relative to the segment start
    pub fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if offset.saturating_add(len as u64) > self.length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {len} bytes at {offset} exceeds segment length {}",
                    self.length
                ),
            ));
        }
        let mut buf = vec![0u8; len];
        self.source.read_at(self.offset + offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the whole segment
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let len = usize::try_from(self.length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment too large for memory"))?;
        self.read(0, len)
    }

    /// Sub-range relative to the segment start
    pub fn slice(&self, offset: u64, length: u64) -> Option<Self> {
        let end = offset.checked_add(length)?;
        (end <= self.length).then(|| Self::new(self.source.clone(), self.offset + offset, length))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_segment() {
        let segment = Segment::from_bytes((0u8..32).collect::<Vec<_>>());
        assert_eq!(segment.len(), 32);
        let sub = segment.slice(8, 8).unwrap();
        assert_eq!(sub.read_all().unwrap(), (8u8..16).collect::<Vec<_>>());
        assert_eq!(sub.read(2, 2).unwrap(), vec![10, 11]);
        assert!(sub.read(7, 2).is_err());
        assert!(segment.slice(30, 4).is_none());
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abcdefgh").unwrap();
        file.flush().unwrap();

        let source = ByteSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 8);
        assert_eq!(source.path(), Some(file.path()));
        let segment = Segment::new(source.clone(), 2, 4);
        assert!(segment.in_bounds());
        assert_eq!(segment.read_all().unwrap(), b"cdef");
        assert!(source.same_as(segment.source()));

        let past_end = Segment::new(source, 6, 4);
        assert!(!past_end.in_bounds());
        let err = past_end.read_all().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
