//! Container directory and resolution pipeline
//!
//! A container file is a fixed header followed by lump data. The header's
//! directory maps each entry id to an offset, a length, a version and a
//! compression tag. [`resolve_entry`] turns one directory slot into a
//! [`LazyLump`]:
//!
//! 1. External override: a sibling `<container>.<id:04x>.<suffix>` file wins
//! 2. Bounds check of the internal range
//! 3. Decompression, checked against the compression tag
//! 4. Schema dispatch by entry id and version
//! 5. Typed view, or raw bytes when no layout fits

use crate::compression::{CompressionAdapter, Payload};
use crate::config::LoadOptions;
use crate::external::{ExternalSegmentResolver, SegmentOrigin, external_segment_path};
use crate::lump::{LazyLump, LumpError};
use crate::nested::NestedDirectory;
use crate::source::{ByteSource, Segment};
use crate::{ContainerError, LoadError, Result};
use lumpkit_formats::branches::detect;
use lumpkit_formats::header::{ContainerHeader, ContainerVersion, HeaderError, LumpHeader};
use lumpkit_formats::schema::Branch;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Byte alignment of lumps in written containers
pub const LUMP_ALIGNMENT: u64 = 4;

/// One directory slot, with its resolved name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry id (slot index)
    pub id: u32,
    /// Entry name from the branch tables
    pub name: String,
    /// Absolute offset of the stored bytes
    pub offset: u64,
    /// Stored length
    pub length: u64,
    /// Lump format version
    pub version: u32,
    /// Decompressed length, zero when stored plain
    pub compression_tag: u32,
}

impl Entry {
    /// Whether the slot points at no data
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Parsed container header plus an open handle on the file
#[derive(Debug, Clone)]
pub struct Directory {
    path: PathBuf,
    source: ByteSource,
    header: ContainerHeader,
    entries: Vec<Entry>,
}

impl Directory {
    /// Container path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open file handle
    pub const fn source(&self) -> &ByteSource {
        &self.source
    }

    /// File size at open time
    pub fn file_size(&self) -> u64 {
        self.source.len()
    }

    /// Container version
    pub const fn version(&self) -> ContainerVersion {
        self.header.version
    }

    /// Map revision, when the format stores one
    pub const fn revision(&self) -> Option<u32> {
        self.header.revision
    }

    /// Raw header
    pub const fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Every slot in id order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Slot for `id`
    pub fn entry(&self, id: u32) -> Result<&Entry> {
        self.entries
            .get(id as usize)
            .ok_or(ContainerError::UnknownEntry {
                id,
                count: self.entries.len(),
            })
    }
}

/// Read the header and directory of the container at `path`
///
/// # Errors
///
/// Returns an error if the file cannot be opened, is shorter than the
/// header, or does not carry the branch's magic.
pub fn open_container(path: impl AsRef<Path>, branch: &Branch) -> Result<Directory> {
    let path = path.as_ref();
    let source = ByteSource::open(path)?;
    let header_size = branch.format.header_size();
    let mut bytes = vec![0u8; header_size.min(source.len()) as usize];
    source.read_at(0, &mut bytes)?;
    let header = ContainerHeader::read(&mut Cursor::new(bytes), &branch.format)?;

    if !branch.supports(header.version.major()) {
        warn!(
            "{}: version {} is not one of the {} branch versions {:?}",
            path.display(),
            header.version,
            branch.name,
            branch.versions
        );
    }

    let entries = header
        .entries
        .iter()
        .enumerate()
        .map(|(id, slot)| Entry {
            id: id as u32,
            name: branch.entry_name(id as u32),
            offset: u64::from(slot.offset),
            length: u64::from(slot.length),
            version: slot.version,
            compression_tag: slot.compression_tag,
        })
        .collect();

    Ok(Directory {
        path: path.to_path_buf(),
        source,
        header,
        entries,
    })
}

/// A resolved entry
#[derive(Debug)]
pub struct Resolution {
    /// Lazy view over the entry
    pub lump: LazyLump,
    /// Recoverable problems met on the way
    pub issues: Vec<LoadError>,
    /// Where the bytes came from
    pub origin: SegmentOrigin,
}

/// Resolve entry `id` of `directory` into a lazy view
///
/// Recoverable problems (unknown version, record size mismatch, unreadable
/// external file) degrade the view and are returned in
/// [`Resolution::issues`]. Problems that leave no usable bytes are errors.
///
/// # Errors
///
/// Returns [`ContainerError::UnknownEntry`] for ids outside the directory
/// and [`ContainerError::Load`] for fatal per-entry problems.
pub fn resolve_entry(
    directory: &Directory,
    id: u32,
    branch: &Branch,
    options: &LoadOptions,
) -> Result<Resolution> {
    let resolver = ExternalSegmentResolver::new(directory.path(), options);
    resolve_with(directory, id, branch, options, &resolver)
}

fn resolve_with(
    directory: &Directory,
    id: u32,
    branch: &Branch,
    options: &LoadOptions,
    resolver: &ExternalSegmentResolver,
) -> Result<Resolution> {
    let entry = directory.entry(id)?;
    let name = entry.name.as_str();
    let mut issues = Vec::new();

    let internal = Segment::new(directory.source.clone(), entry.offset, entry.length);
    let located = resolver.locate(id, name, internal);
    issues.extend(located.issue);

    if located.origin == SegmentOrigin::Internal && !located.segment.in_bounds() {
        return Err(LoadError::OutOfBounds {
            entry: name.to_string(),
            offset: entry.offset,
            length: entry.length,
            available: directory.file_size(),
        }
        .into());
    }

    let adapter = CompressionAdapter::new(options.max_decompressed_size);
    let stored_length = located.segment.len();
    let payload = match located.origin {
        SegmentOrigin::Internal => adapter.decode_entry(located.segment, entry.compression_tag),
        SegmentOrigin::External(_) => adapter.decode_detected(located.segment),
    }
    .map_err(|e| LoadError::from_compression(name, e))?;
    if matches!(payload, Payload::Empty) {
        warn!(
            "{}: compressed payload of {} bytes has no room for its header",
            name, stored_length
        );
        issues.push(LoadError::EmptyCompressed {
            entry: name.to_string(),
            length: stored_length,
        });
    }

    let dispatch = branch.registry.dispatch(id, entry.version);
    let (lump, issue) =
        LazyLump::dispatched(name, payload.into_segment(), dispatch, entry.version);
    issues.extend(issue);
    let lump = lump.with_origin(entry.offset).with_strict(options.strict);

    debug!(
        "Resolved {} (id {}, version {}): {} elements of {} bytes",
        name,
        id,
        entry.version,
        lump.len(),
        lump.record_size()
    );
    Ok(Resolution {
        lump,
        issues,
        origin: located.origin,
    })
}

/// Parse the nested directory held in a resolved game lump
///
/// # Errors
///
/// Returns an error if the directory itself cannot be read; problems with
/// single children are kept in [`NestedDirectory::errors`].
pub fn open_nested_directory(
    lump: &LazyLump,
    branch: &Branch,
    options: &LoadOptions,
) -> Result<NestedDirectory> {
    let format = branch
        .nested
        .as_ref()
        .ok_or_else(|| ContainerError::NoNestedFormat(branch.name.clone()))?;
    let parent = if lump.is_modified() {
        Segment::from_bytes(lump.materialize()?)
    } else {
        lump.segment().clone()
    };
    Ok(NestedDirectory::parse(
        lump.name(),
        &parent,
        lump.origin(),
        format,
        &branch.registry,
        options,
    )?)
}

/// Recoverable and fatal problems per entry name
///
/// Children of nested directories are keyed `"<ENTRY>.<child>"`.
#[derive(Debug, Default)]
pub struct ErrorLog {
    errors: BTreeMap<String, Vec<LoadError>>,
}

impl ErrorLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem under `key`
    pub fn push(&mut self, key: impl Into<String>, error: LoadError) {
        self.errors.entry(key.into()).or_default().push(error);
    }

    /// Problems recorded for `key`
    pub fn get(&self, key: &str) -> &[LoadError] {
        self.errors.get(key).map_or(&[], Vec::as_slice)
    }

    /// Whether `key` has any problem
    pub fn contains(&self, key: &str) -> bool {
        self.errors.contains_key(key)
    }

    /// Keys with problems, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// Every key with its problems
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[LoadError])> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of keys with problems
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Keys whose entry was excluded
    pub fn fatal(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, errors)| errors.iter().any(LoadError::is_fatal))
            .map(|(key, _)| key)
    }
}

impl fmt::Display for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, errors) in self.iter() {
            for error in errors {
                writeln!(f, "{error}")?;
            }
        }
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Decode every record of `lump`, logging failures under `key`
fn log_record_failures(lump: &LazyLump, key: &str, errors: &mut ErrorLog) {
    match lump.decode_failures() {
        Ok(failures) => {
            for (index, cause) in failures {
                warn!("{}: record {} failed to decode: {}", key, index, cause);
                errors.push(
                    key,
                    LoadError::RecordDecodeError {
                        entry: key.to_string(),
                        index,
                        cause,
                    },
                );
            }
        }
        Err(e) => {
            warn!("{}: record scan failed: {}", key, e);
            let source = match e {
                LumpError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            };
            errors.push(
                key,
                LoadError::Io {
                    entry: key.to_string(),
                    source,
                },
            );
        }
    }
}

/// Everything [`Container::load_all`] could resolve
#[derive(Debug, Default)]
pub struct Loaded {
    /// Resolved entries by id
    pub lumps: BTreeMap<u32, LazyLump>,
    /// Parsed game lump, when the branch has one and it loaded
    pub nested: Option<NestedDirectory>,
    /// Problems by entry name
    pub errors: ErrorLog,
}

/// An open container bound to a branch
#[derive(Debug)]
pub struct Container {
    directory: Directory,
    branch: Arc<Branch>,
    options: LoadOptions,
    resolver: ExternalSegmentResolver,
}

impl Container {
    /// Open the container at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read.
    pub fn open(path: impl AsRef<Path>, branch: Arc<Branch>, options: LoadOptions) -> Result<Self> {
        let directory = open_container(path, &branch)?;
        let resolver = ExternalSegmentResolver::new(directory.path(), &options);
        info!(
            "Opened {} ({} v{}, {} entries, {} bytes)",
            directory.path().display(),
            branch.name,
            directory.version(),
            directory.entries().len(),
            directory.file_size()
        );
        Ok(Self {
            directory,
            branch,
            options,
            resolver,
        })
    }

    /// Open with the first branch that claims the file's magic and version
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidMagic`] when no branch matches.
    pub fn open_detect(
        path: impl AsRef<Path>,
        branches: &[Arc<Branch>],
        options: LoadOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let source = ByteSource::open(path)?;
        let mut prefix = [0u8; 8];
        source.read_at(0, &mut prefix).map_err(|_| HeaderError::Truncated {
            what: "container magic",
            needed: 8,
            available: source.len(),
        })?;
        let magic = [prefix[0], prefix[1], prefix[2], prefix[3]];
        let raw_version = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let branch = branches
            .iter()
            .filter(|b| b.format.magic == magic)
            .find_map(|b| {
                let major = b.format.version_encoding.decode(raw_version).major();
                detect(branches, &magic, major)
            })
            .or_else(|| branches.iter().find(|b| b.format.magic == magic))
            .ok_or(HeaderError::InvalidMagic {
                expected: branches.first().map_or([0; 4], |b| b.format.magic),
                actual: magic,
            })?;
        Self::open(path, Arc::clone(branch), options)
    }

    /// Parsed directory
    pub const fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Branch the container is read with
    pub fn branch(&self) -> &Arc<Branch> {
        &self.branch
    }

    /// Load options
    pub const fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Ids with an external file next to the container
    pub fn external_entries(&self) -> Vec<u32> {
        self.resolver.discover(self.directory.entries().len())
    }

    /// Resolve entry `id`
    ///
    /// # Errors
    ///
    /// See [`resolve_entry`].
    pub fn resolve_entry(&self, id: u32) -> Result<Resolution> {
        resolve_with(&self.directory, id, &self.branch, &self.options, &self.resolver)
    }

    /// Resolve entry `id` and keep only the view
    ///
    /// # Errors
    ///
    /// See [`resolve_entry`].
    pub fn lump(&self, id: u32) -> Result<LazyLump> {
        Ok(self.resolve_entry(id)?.lump)
    }

    /// Resolve the branch's game lump and parse its nested directory
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NoNestedFormat`] for branches without one.
    pub fn open_nested_directory(&self) -> Result<NestedDirectory> {
        let format = self
            .branch
            .nested
            .as_ref()
            .ok_or_else(|| ContainerError::NoNestedFormat(self.branch.name.clone()))?;
        let lump = self.lump(format.entry_id)?;
        open_nested_directory(&lump, &self.branch, &self.options)
    }

    fn should_load(&self, entry: &Entry) -> bool {
        !entry.is_empty() || self.resolver.has_external(entry.id)
    }

    /// Resolve every non-empty entry
    ///
    /// Fatal problems exclude only their entry. Every problem, fatal or
    /// not, lands in [`Loaded::errors`].
    pub fn load_all(&self) -> Loaded {
        let mut loaded = Loaded::default();
        for entry in self.directory.entries() {
            if !self.should_load(entry) {
                continue;
            }
            match self.resolve_entry(entry.id) {
                Ok(resolution) => {
                    for issue in resolution.issues {
                        loaded.errors.push(&entry.name, issue);
                    }
                    if self.options.validate_records {
                        log_record_failures(&resolution.lump, &entry.name, &mut loaded.errors);
                    }
                    loaded.lumps.insert(entry.id, resolution.lump);
                }
                Err(ContainerError::Load(e)) => {
                    warn!("{} excluded: {}", entry.name, e);
                    loaded.errors.push(&entry.name, e);
                }
                Err(e) => {
                    warn!("{} excluded: {}", entry.name, e);
                    loaded.errors.push(
                        &entry.name,
                        LoadError::Io {
                            entry: entry.name.clone(),
                            source: std::io::Error::other(e.to_string()),
                        },
                    );
                }
            }
        }

        if let Some(format) = &self.branch.nested {
            if let Some(lump) = loaded.lumps.get(&format.entry_id) {
                match open_nested_directory(lump, &self.branch, &self.options) {
                    Ok(mut nested) => {
                        for (child, errors) in nested.take_errors() {
                            for error in errors {
                                loaded.errors.push(format!("{}.{}", nested.entry(), child), error);
                            }
                        }
                        if self.options.validate_records {
                            for child in nested.children() {
                                let key = format!("{}.{}", nested.entry(), child.name);
                                log_record_failures(&child.lump, &key, &mut loaded.errors);
                            }
                        }
                        loaded.nested = Some(nested);
                    }
                    Err(ContainerError::Load(e)) => {
                        warn!("{} nested directory unreadable: {}", lump.name(), e);
                        loaded.errors.push(lump.name(), e);
                    }
                    Err(e) => {
                        warn!("{} nested directory unreadable: {}", lump.name(), e);
                    }
                }
            }
        }

        info!(
            "Loaded {} of {} entries from {}, {} with problems",
            loaded.lumps.len(),
            self.directory.entries().len(),
            self.directory.path().display(),
            loaded.errors.len()
        );
        loaded
    }

    /// Write a new container to `path`
    ///
    /// `lumps` replaces the entries it names; the rest are copied from this
    /// container. Lumps are written uncompressed, 4-byte aligned, in the
    /// order of their original offsets. Entries that came from external
    /// files are written to external files next to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if a lump cannot be read, the file cannot be written,
    /// or `path` is the file this container reads from.
    pub fn save_as(&self, path: impl AsRef<Path>, lumps: &BTreeMap<u32, LazyLump>) -> Result<()> {
        self.save_with(path.as_ref(), lumps, None)
    }

    /// Like [`save_as`](Self::save_as), re-serializing `nested` as the game lump
    ///
    /// # Errors
    ///
    /// See [`save_as`](Self::save_as).
    pub fn save_with_nested(
        &self,
        path: impl AsRef<Path>,
        lumps: &BTreeMap<u32, LazyLump>,
        nested: &NestedDirectory,
    ) -> Result<()> {
        self.save_with(path.as_ref(), lumps, Some(nested))
    }

    fn save_with(
        &self,
        path: &Path,
        lumps: &BTreeMap<u32, LazyLump>,
        nested: Option<&NestedDirectory>,
    ) -> Result<()> {
        // lumps are read lazily from the source while writing
        if same_file(path, self.directory.path()) {
            return Err(ContainerError::SaveOverSource(path.to_path_buf()));
        }
        let format = &self.branch.format;
        let nested_id = self.branch.nested.as_ref().map(|n| n.entry_id);
        let mut header = self.directory.header.clone();
        for slot in &mut header.entries {
            *slot = LumpHeader::default();
        }

        let mut order: Vec<&Entry> = self.directory.entries().iter().collect();
        order.sort_by_key(|e| (e.offset, e.id));

        let mut writer = BufWriter::new(File::create(path)?);
        let header_size = format.header_size();
        writer.write_all(&vec![0u8; header_size as usize])?;
        let mut cursor = header_size;

        for entry in order {
            let external = self.resolver.has_external(entry.id);
            let supplied = lumps.get(&entry.id);
            if supplied.is_none() && !external && !self.should_load(entry) {
                header.entries[entry.id as usize].version = entry.version;
                continue;
            }

            let padding = cursor.next_multiple_of(LUMP_ALIGNMENT) - cursor;
            writer.write_all(&vec![0u8; padding as usize])?;
            cursor += padding;

            let (bytes, compression_tag) = if Some(entry.id) == nested_id && supplied.is_none() {
                self.nested_bytes(entry, nested, cursor)?
            } else {
                self.entry_bytes(entry, supplied)?
            };
            let version = supplied.map_or(entry.version, LazyLump::version);

            let slot = &mut header.entries[entry.id as usize];
            slot.version = version;
            slot.compression_tag = compression_tag;
            slot.offset = u32::try_from(cursor).map_err(|_| ContainerError::TooLarge(entry.name.clone()))?;
            if external {
                let sibling = external_segment_path(path, entry.id, &self.options.external_suffix);
                std::fs::write(&sibling, &bytes)?;
                debug!("Wrote {} to {}", entry.name, sibling.display());
                slot.length = 0;
                continue;
            }
            slot.length =
                u32::try_from(bytes.len()).map_err(|_| ContainerError::TooLarge(entry.name.clone()))?;
            writer.write_all(&bytes)?;
            cursor += bytes.len() as u64;
        }

        writer.seek(SeekFrom::Start(0))?;
        header.write(&mut writer, format)?;
        writer.flush()?;
        info!("Saved {} ({} bytes)", path.display(), cursor);
        Ok(())
    }

    /// Game lump bytes for offset `base`, re-serialized so absolute offsets stay valid
    fn nested_bytes(
        &self,
        entry: &Entry,
        nested: Option<&NestedDirectory>,
        base: u64,
    ) -> Result<(Vec<u8>, u32)> {
        if let Some(nested) = nested {
            return Ok((nested.to_bytes(base)?, 0));
        }
        match self.open_nested_directory() {
            Ok(nested) => Ok((nested.to_bytes(base)?, 0)),
            Err(e) => {
                warn!("{}: nested directory not rewritten: {}", entry.name, e);
                self.entry_bytes(entry, None)
            }
        }
    }

    /// Bytes and compression tag for one entry
    ///
    /// Entries that fail to resolve are copied verbatim with their tag.
    fn entry_bytes(&self, entry: &Entry, supplied: Option<&LazyLump>) -> Result<(Vec<u8>, u32)> {
        if let Some(lump) = supplied {
            return Ok((lump.materialize()?, 0));
        }
        match self.resolve_entry(entry.id) {
            Ok(resolution) => Ok((resolution.lump.materialize()?, 0)),
            Err(ContainerError::Load(e)) => {
                warn!("{}: copying stored bytes verbatim: {}", entry.name, e);
                let stored = Segment::new(self.directory.source.clone(), entry.offset, entry.length);
                Ok((stored.read_all()?, entry.compression_tag))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use lumpkit_formats::header::{ContainerFormat, VersionEncoding};
    use lumpkit_formats::layout::{Coercion, EnumSpec, FieldLayout, Primitive};
    use lumpkit_formats::schema::SchemaRegistry;

    fn tiny_branch() -> Branch {
        let vertex = FieldLayout::builder("Vertex", 12)
            .array("position", Primitive::F32, 3)
            .build()
            .unwrap();
        let mut registry = SchemaRegistry::new().with_names(&[(0, "ENTITIES"), (1, "VERTICES")]);
        registry.register(1, 0, &vertex).unwrap();
        Branch {
            name: "tiny".to_string(),
            versions: vec![1],
            format: ContainerFormat {
                magic: *b"TINY",
                version_encoding: VersionEncoding::Single,
                directory_offset: 8,
                entry_count: 4,
                revision_offset: None,
            },
            registry,
            nested: None,
        }
    }

    fn write_container(path: &Path, branch: &Branch, lumps: &[(u32, u32, &[u8])]) {
        let mut header = ContainerHeader::new(&branch.format, ContainerVersion::Single(1), None);
        let mut data = Vec::new();
        let mut offset = branch.format.header_size();
        for (id, version, bytes) in lumps {
            header.entries[*id as usize] = LumpHeader {
                offset: offset as u32,
                length: bytes.len() as u32,
                version: *version,
                compression_tag: 0,
            };
            data.extend_from_slice(bytes);
            offset += bytes.len() as u64;
        }
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out, &branch.format).unwrap();
        let mut out = out.into_inner();
        out.extend_from_slice(&data);
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn test_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bsp");
        let branch = tiny_branch();
        write_container(&path, &branch, &[(0, 0, b"{}\0"), (1, 0, &[0u8; 24])]);

        let directory = open_container(&path, &branch).unwrap();
        assert_eq!(directory.version(), ContainerVersion::Single(1));
        assert_eq!(directory.entries().len(), 4);
        assert_eq!(directory.entry(1).unwrap().name, "VERTICES");
        assert_eq!(directory.entry(1).unwrap().length, 24);
        assert!(directory.entry(2).unwrap().is_empty());
        assert!(matches!(
            directory.entry(9),
            Err(ContainerError::UnknownEntry { id: 9, count: 4 })
        ));

        let resolution = resolve_entry(&directory, 1, &branch, &LoadOptions::default()).unwrap();
        assert!(resolution.lump.is_typed());
        assert_eq!(resolution.lump.len(), 2);
        assert!(resolution.issues.is_empty());
        assert_eq!(resolution.origin, SegmentOrigin::Internal);
    }

    #[test]
    fn test_save_over_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bsp");
        let branch = Arc::new(tiny_branch());
        write_container(&path, &branch, &[(0, 0, b"{}\0"), (1, 0, &[0u8; 12])]);
        let before = std::fs::read(&path).unwrap();

        let container = Container::open(&path, branch, LoadOptions::default()).unwrap();
        let lumps = BTreeMap::new();
        assert!(matches!(
            container.save_as(&path, &lumps),
            Err(ContainerError::SaveOverSource(_))
        ));
        let aliased = dir.path().join(".").join("map.bsp");
        assert!(matches!(
            container.save_as(&aliased, &lumps),
            Err(ContainerError::SaveOverSource(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);

        let copy = dir.path().join("copy.bsp");
        container.save_as(&copy, &lumps).unwrap();
        let saved = open_container(&copy, &tiny_branch()).unwrap();
        assert_eq!(saved.entry(1).unwrap().length, 12);
    }

    #[test]
    fn test_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bsp");
        let mut bytes = vec![0u8; 128];
        bytes[..4].copy_from_slice(b"NOPE");
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            open_container(&path, &tiny_branch()),
            Err(ContainerError::Header(HeaderError::InvalidMagic { .. }))
        ));
    }

    #[test]
    fn test_out_of_bounds_entry_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bsp");
        let branch = Arc::new(tiny_branch());
        write_container(&path, &branch, &[(0, 0, b"{}\0"), (1, 0, &[0u8; 12])]);
        // grow VERTICES past the end of the file
        let mut bytes = std::fs::read(&path).unwrap();
        let slot = 8 + 16 + 4;
        bytes[slot..slot + 4].copy_from_slice(&1200u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let container = Container::open(&path, branch, LoadOptions::default()).unwrap();
        let loaded = container.load_all();
        assert!(loaded.lumps.contains_key(&0));
        assert!(!loaded.lumps.contains_key(&1));
        assert!(matches!(
            loaded.errors.get("VERTICES"),
            [LoadError::OutOfBounds { length: 1200, .. }]
        ));
        assert_eq!(loaded.errors.fatal().collect::<Vec<_>>(), vec!["VERTICES"]);
    }

    #[test]
    fn test_record_scan_fills_error_log() {
        let side = Arc::new(EnumSpec::closed("Side", &[("FRONT", 0), ("BACK", 1)]));
        let portal = FieldLayout::builder("Portal", 1)
            .scalar("side", Primitive::U8)
            .coerce("side", Coercion::Enum(side))
            .build()
            .unwrap();
        let mut branch = tiny_branch();
        branch.registry = branch.registry.with_names(&[(2, "PORTALS")]);
        branch.registry.register(2, 0, &portal).unwrap();
        let branch = Arc::new(branch);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bsp");
        write_container(&path, &branch, &[(2, 0, &[0, 7, 1, 9])]);

        let lazy = Container::open(&path, Arc::clone(&branch), LoadOptions::default()).unwrap();
        let loaded = lazy.load_all();
        assert!(loaded.lumps.contains_key(&2));
        assert!(loaded.errors.is_empty());

        let options = LoadOptions::default().with_validate_records(true);
        let scanned = Container::open(&path, branch, options).unwrap();
        let loaded = scanned.load_all();
        // recoverable, the entry stays loaded
        assert_eq!(loaded.lumps[&2].len(), 4);
        assert!(matches!(
            loaded.errors.get("PORTALS"),
            [
                LoadError::RecordDecodeError { index: 1, .. },
                LoadError::RecordDecodeError { index: 3, .. }
            ]
        ));
        assert_eq!(loaded.errors.fatal().count(), 0);
    }

    #[test]
    fn test_error_log() {
        let mut log = ErrorLog::new();
        assert!(log.is_empty());
        log.push(
            "PLANES",
            LoadError::UnsupportedVersion {
                entry: "PLANES".to_string(),
                version: 3,
                known: vec![0],
            },
        );
        assert!(log.contains("PLANES"));
        assert_eq!(log.len(), 1);
        assert!(log.get("EDGES").is_empty());
        assert_eq!(log.fatal().count(), 0);
        assert_eq!(log.to_string(), "PLANES: version 3 has no layout (known: [0])\n");
    }
}
