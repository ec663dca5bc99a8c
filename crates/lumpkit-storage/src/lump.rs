//! Lazy lump views
//!
//! A [`LazyLump`] indexes a [`Segment`] as an array of fixed-size records
//! (or single bytes when no layout applies) and decodes only what is asked
//! for. Writes go to an overlay map from logical index to element; reads
//! consult the overlay first. Inserts and deletes shift overlay keys and are
//! tracked in a piece table so that untouched records keep reading their
//! original source position. Nothing is written back until [`LazyLump::materialize`].

use crate::LoadError;
use crate::source::Segment;
use lumpkit_formats::layout::{FieldKind, FieldLayout, LayoutError, Record, Value};
use lumpkit_formats::schema::Dispatch;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Range, RangeFrom, RangeFull, RangeInclusive, RangeTo};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by lump access
#[derive(Debug, Error)]
pub enum LumpError {
    /// Index outside `-len..len`
    #[error("index {index} out of range for lump of length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: isize,
        /// Lump length
        len: usize,
    },

    /// Slice cannot be evaluated
    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    /// Element kind does not match the lump
    #[error("expected {expected}, got {actual}")]
    ElementMismatch {
        /// What the lump holds
        expected: String,
        /// What was provided
        actual: String,
    },

    /// Segment length is not a whole number of records
    #[error("{length} bytes is not a multiple of the {record_size} byte record")]
    RecordSizeMismatch {
        /// Segment length
        length: u64,
        /// Record size
        record_size: usize,
    },

    /// A record failed to decode
    #[error("record {index} failed to decode: {cause}")]
    RecordDecodeError {
        /// Logical index
        index: usize,
        /// Decode failure
        #[source]
        cause: LayoutError,
    },

    /// Record failed to encode
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// I/O error while reading the segment
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lump operations
pub type LumpResult<T> = Result<T, LumpError>;

/// One element of a lump
#[derive(Debug, Clone, PartialEq)]
pub enum LumpElement {
    /// Decoded record of a typed lump
    Record(Record),
    /// One byte of a raw lump
    Byte(u8),
    /// Bytes of a record that failed to decode, from lenient slice reads
    Undecoded(Vec<u8>),
}

impl LumpElement {
    /// Record view
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Owned record
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Byte view
    pub const fn as_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(b) => Some(*b),
            _ => None,
        }
    }

    fn kind_name(&self) -> String {
        match self {
            Self::Record(r) => format!("{} record", r.layout().name()),
            Self::Byte(_) => "byte".to_string(),
            Self::Undecoded(_) => "undecoded bytes".to_string(),
        }
    }
}

impl From<Record> for LumpElement {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl From<u8> for LumpElement {
    fn from(b: u8) -> Self {
        Self::Byte(b)
    }
}

impl fmt::Display for LumpElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(r) => write!(f, "{r}"),
            Self::Byte(b) => write!(f, "{b}"),
            Self::Undecoded(bytes) => write!(f, "<undecoded {} bytes>", bytes.len()),
        }
    }
}

/// Python-style slice: optional start, stop and step, negative values count from the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    /// First index, default depends on the step direction
    pub start: Option<isize>,
    /// End index (exclusive)
    pub stop: Option<isize>,
    /// Step, default 1, never 0
    pub step: Option<isize>,
}

impl Slice {
    /// Slice from its parts
    pub const fn new(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Self { start, stop, step }
    }

    /// Every index
    pub const fn full() -> Self {
        Self::new(None, None, None)
    }

    /// Every index, last to first
    pub const fn reversed() -> Self {
        Self::new(None, None, Some(-1))
    }

    /// Concrete indices for a sequence of `len` elements, in slice order
    pub fn indices(&self, len: usize) -> LumpResult<Vec<usize>> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(LumpError::InvalidSlice("slice step cannot be zero".to_string()));
        }
        let len = len as isize;
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(v) if v < 0 => (v + len).max(lower),
            Some(v) => v.min(upper),
        };
        let start = clamp(self.start, if step > 0 { lower } else { upper });
        let stop = clamp(self.stop, if step > 0 { upper } else { lower });

        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
        Ok(out)
    }
}

impl From<Range<usize>> for Slice {
    fn from(r: Range<usize>) -> Self {
        Self::new(Some(r.start as isize), Some(r.end as isize), None)
    }
}

impl From<RangeFrom<usize>> for Slice {
    fn from(r: RangeFrom<usize>) -> Self {
        Self::new(Some(r.start as isize), None, None)
    }
}

impl From<RangeTo<usize>> for Slice {
    fn from(r: RangeTo<usize>) -> Self {
        Self::new(None, Some(r.end as isize), None)
    }
}

impl From<RangeInclusive<usize>> for Slice {
    fn from(r: RangeInclusive<usize>) -> Self {
        Self::new(Some(*r.start() as isize), Some(*r.end() as isize + 1), None)
    }
}

impl From<RangeFull> for Slice {
    fn from(_: RangeFull) -> Self {
        Self::full()
    }
}

/// Run of logical indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    /// Consecutive source records starting at `start`
    Source { start: usize, len: usize },
    /// Elements that only exist in the overlay
    Staged { len: usize },
}

impl Piece {
    const fn len(self) -> usize {
        match self {
            Self::Source { len, .. } | Self::Staged { len } => len,
        }
    }

    /// Split at `at`, both halves non-empty
    const fn split(self, at: usize) -> (Self, Self) {
        match self {
            Self::Source { start, len } => (
                Self::Source { start, len: at },
                Self::Source {
                    start: start + at,
                    len: len - at,
                },
            ),
            Self::Staged { len } => (Self::Staged { len: at }, Self::Staged { len: len - at }),
        }
    }
}

/// Randomly indexable, lazily decoded view over one lump
///
/// The overlay belongs to this value. A second lump resolved over the same
/// entry reads the source and does not see these edits.
#[derive(Debug, Clone)]
pub struct LazyLump {
    name: String,
    segment: Segment,
    layout: Option<Arc<FieldLayout>>,
    record_size: usize,
    source_len: usize,
    len: usize,
    pieces: Vec<Piece>,
    overlay: BTreeMap<usize, LumpElement>,
    version: u32,
    origin: u64,
    strict: bool,
}

impl LazyLump {
    fn with_layout(name: &str, segment: Segment, layout: Option<Arc<FieldLayout>>, record_size: usize) -> Self {
        let source_len = (segment.len() / record_size as u64) as usize;
        let pieces = if source_len == 0 {
            Vec::new()
        } else {
            vec![Piece::Source {
                start: 0,
                len: source_len,
            }]
        };
        Self {
            name: name.to_string(),
            origin: segment.offset(),
            segment,
            layout,
            record_size,
            source_len,
            len: source_len,
            pieces,
            overlay: BTreeMap::new(),
            version: 0,
            strict: false,
        }
    }

    /// Byte view of a segment
    pub fn raw(name: &str, segment: Segment) -> Self {
        Self::with_layout(name, segment, None, 1)
    }

    /// Record view of a segment
    ///
    /// Fails with [`LumpError::RecordSizeMismatch`] when the segment is not
    /// a whole number of records; callers fall back to [`LazyLump::raw`].
    pub fn typed(name: &str, segment: Segment, layout: Arc<FieldLayout>) -> LumpResult<Self> {
        let record_size = layout.size();
        if record_size == 0 || segment.len() % record_size as u64 != 0 {
            return Err(LumpError::RecordSizeMismatch {
                length: segment.len(),
                record_size,
            });
        }
        Ok(Self::with_layout(name, segment, Some(layout), record_size))
    }

    /// Empty record lump, filled through [`append`](Self::append)
    pub fn empty(name: &str, layout: Arc<FieldLayout>) -> Self {
        let record_size = layout.size().max(1);
        Self::with_layout(name, Segment::empty(), Some(layout), record_size)
    }

    /// View chosen by a schema lookup
    ///
    /// Falls back to a byte view when no layout applies; the reason is
    /// returned alongside so callers can log it.
    pub fn dispatched(
        name: &str,
        segment: Segment,
        dispatch: Dispatch,
        version: u32,
    ) -> (Self, Option<LoadError>) {
        let (lump, issue) = match dispatch {
            Dispatch::Layout(layout) => {
                let layout_name = layout.name().to_string();
                match Self::typed(name, segment.clone(), layout) {
                    Ok(lump) => (lump, None),
                    Err(e) => {
                        warn!("{}: {}, reading raw bytes", name, e);
                        let record_size = match e {
                            LumpError::RecordSizeMismatch { record_size, .. } => record_size,
                            _ => 0,
                        };
                        (
                            Self::raw(name, segment.clone()),
                            Some(LoadError::RecordSizeMismatch {
                                entry: name.to_string(),
                                layout: layout_name,
                                length: segment.len(),
                                record_size,
                            }),
                        )
                    }
                }
            }
            Dispatch::Unmodeled => {
                debug!("{}: no layout in this branch, reading raw bytes", name);
                (Self::raw(name, segment), None)
            }
            Dispatch::UnknownVersion { known } => {
                warn!(
                    "{}: no layout for version {} (known: {:?}), reading raw bytes",
                    name, version, known
                );
                (
                    Self::raw(name, segment),
                    Some(LoadError::UnsupportedVersion {
                        entry: name.to_string(),
                        version,
                        known,
                    }),
                )
            }
        };
        (lump.with_version(version), issue)
    }

    /// Set the entry version carried for rewriting
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the offset the entry was declared at in its container
    #[must_use]
    pub const fn with_origin(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }

    /// Abort slice reads on the first decode error
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Entry name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of elements
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the lump has no elements
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per element
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    /// Record layout, `None` for byte views
    pub const fn layout(&self) -> Option<&Arc<FieldLayout>> {
        self.layout.as_ref()
    }

    /// Whether elements are records
    pub const fn is_typed(&self) -> bool {
        self.layout.is_some()
    }

    /// Backing segment
    pub const fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Entry version
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Offset the entry was declared at in its container
    pub const fn origin(&self) -> u64 {
        self.origin
    }

    /// Whether any element was staged, inserted or deleted
    pub fn is_modified(&self) -> bool {
        let untouched = match self.pieces.as_slice() {
            [] => self.source_len == 0,
            [Piece::Source { start: 0, len }] => *len == self.source_len,
            _ => false,
        };
        !self.overlay.is_empty() || !untouched
    }

    /// Indices with a staged element, ascending
    pub fn overlay_indices(&self) -> Vec<usize> {
        self.overlay.keys().copied().collect()
    }

    fn normalize(&self, index: isize) -> LumpResult<usize> {
        let resolved = if index < 0 { index + self.len as isize } else { index };
        if resolved < 0 || resolved as usize >= self.len {
            return Err(LumpError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(resolved as usize)
    }

    /// Piece holding `index` and the position within it
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        let mut base = 0;
        for (i, piece) in self.pieces.iter().enumerate() {
            if index < base + piece.len() {
                return Some((i, index - base));
            }
            base += piece.len();
        }
        None
    }

    fn source_index(&self, index: usize) -> Option<usize> {
        let (i, offset) = self.locate(index)?;
        match self.pieces[i] {
            Piece::Source { start, .. } => Some(start + offset),
            Piece::Staged { .. } => None,
        }
    }

    fn read_source(&self, source_index: usize) -> LumpResult<Vec<u8>> {
        Ok(self
            .segment
            .read((source_index * self.record_size) as u64, self.record_size)?)
    }

    fn decode(&self, index: usize, bytes: &[u8]) -> LumpResult<LumpElement> {
        match &self.layout {
            Some(layout) => layout
                .decode(bytes)
                .map(LumpElement::Record)
                .map_err(|cause| LumpError::RecordDecodeError { index, cause }),
            None => Ok(LumpElement::Byte(bytes[0])),
        }
    }

    /// Element at `index`; negative indices count from the end
    pub fn get(&self, index: isize) -> LumpResult<LumpElement> {
        let index = self.normalize(index)?;
        self.get_at(index)
    }

    fn get_at(&self, index: usize) -> LumpResult<LumpElement> {
        if let Some(element) = self.overlay.get(&index) {
            return Ok(element.clone());
        }
        let Some(source) = self.source_index(index) else {
            return Err(LumpError::IndexOutOfRange {
                index: index as isize,
                len: self.len,
            });
        };
        let bytes = self.read_source(source)?;
        self.decode(index, &bytes)
    }

    /// Record at `index`; fails on byte views
    pub fn record(&self, index: isize) -> LumpResult<Record> {
        match self.get(index)? {
            LumpElement::Record(r) => Ok(r),
            other => Err(LumpError::ElementMismatch {
                expected: "record".to_string(),
                actual: other.kind_name(),
            }),
        }
    }

    /// Elements selected by `slice`, in slice order
    ///
    /// In lenient mode a record that fails to decode becomes
    /// [`LumpElement::Undecoded`]; in strict mode the first failure is returned.
    pub fn get_slice(&self, slice: impl Into<Slice>) -> LumpResult<Vec<LumpElement>> {
        let indices = slice.into().indices(self.len)?;
        let mut out = Vec::with_capacity(indices.len());
        for index in indices {
            match self.get_at(index) {
                Ok(element) => out.push(element),
                Err(LumpError::RecordDecodeError { index, cause }) if !self.strict => {
                    warn!("{}: record {} failed to decode: {}", self.name, index, cause);
                    let bytes = match self.source_index(index) {
                        Some(source) => self.read_source(source)?,
                        None => Vec::new(),
                    };
                    out.push(LumpElement::Undecoded(bytes));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Every element in order, one result per element
    pub fn iter(&self) -> impl Iterator<Item = LumpResult<LumpElement>> + '_ {
        (0..self.len).map(|index| self.get_at(index))
    }

    fn check_element(&self, element: &LumpElement) -> LumpResult<()> {
        let matches = match (&self.layout, element) {
            (Some(layout), LumpElement::Record(record)) => {
                Arc::ptr_eq(layout, record.layout()) || **layout == **record.layout()
            }
            (None, LumpElement::Byte(_)) => true,
            _ => false,
        };
        if matches {
            return Ok(());
        }
        let expected = match &self.layout {
            Some(layout) => format!("{} record", layout.name()),
            None => "byte".to_string(),
        };
        Err(LumpError::ElementMismatch {
            expected,
            actual: element.kind_name(),
        })
    }

    /// Stage `value` at `index`
    pub fn set(&mut self, index: isize, value: impl Into<LumpElement>) -> LumpResult<()> {
        let value = value.into();
        let index = self.normalize(index)?;
        self.check_element(&value)?;
        self.overlay.insert(index, value);
        Ok(())
    }

    /// Add `value` at the end
    pub fn append(&mut self, value: impl Into<LumpElement>) -> LumpResult<()> {
        let value = value.into();
        self.check_element(&value)?;
        self.push_staged(self.pieces.len());
        self.overlay.insert(self.len, value);
        self.len += 1;
        Ok(())
    }

    /// Append every element of `values`
    pub fn extend<I, T>(&mut self, values: I) -> LumpResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<LumpElement>,
    {
        for value in values {
            self.append(value)?;
        }
        Ok(())
    }

    /// Insert `value` before `index`; out of range indices clamp to either end
    pub fn insert(&mut self, index: isize, value: impl Into<LumpElement>) -> LumpResult<()> {
        let value = value.into();
        self.check_element(&value)?;
        let len = self.len as isize;
        let index = (if index < 0 { (index + len).max(0) } else { index.min(len) }) as usize;
        if index == self.len {
            return self.append(value);
        }

        let piece = self.split_at(index);
        self.push_staged(piece);
        let shifted = self.overlay.split_off(&index);
        self.overlay
            .extend(shifted.into_iter().map(|(k, v)| (k + 1, v)));
        self.overlay.insert(index, value);
        self.len += 1;
        Ok(())
    }

    /// Remove the element at `index`
    pub fn delete(&mut self, index: isize) -> LumpResult<()> {
        let index = self.normalize(index)?;
        self.remove_at(index);
        Ok(())
    }

    /// Remove every element selected by `slice`
    ///
    /// Survivors shift down by the number of removed indices before them.
    pub fn delete_slice(&mut self, slice: impl Into<Slice>) -> LumpResult<()> {
        let mut indices = slice.into().indices(self.len)?;
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        for index in indices {
            self.remove_at(index);
        }
        Ok(())
    }

    /// Remove and return the element at `index`
    pub fn pop(&mut self, index: isize) -> LumpResult<LumpElement> {
        let index = self.normalize(index)?;
        let element = self.get_at(index)?;
        self.remove_at(index);
        Ok(element)
    }

    fn remove_at(&mut self, index: usize) {
        let Some((i, offset)) = self.locate(index) else {
            return;
        };
        let piece = self.pieces[i];
        let mut replacement = Vec::with_capacity(2);
        if offset > 0 {
            replacement.push(piece.split(offset).0);
        }
        if offset + 1 < piece.len() {
            replacement.push(piece.split(offset + 1).1);
        }
        self.pieces.splice(i..=i, replacement);

        self.overlay.remove(&index);
        let shifted = self.overlay.split_off(&index);
        self.overlay
            .extend(shifted.into_iter().map(|(k, v)| (k - 1, v)));
        self.len -= 1;
    }

    /// Split pieces so that a piece starts at `index`, returning that piece position
    fn split_at(&mut self, index: usize) -> usize {
        let Some((i, offset)) = self.locate(index) else {
            return self.pieces.len();
        };
        if offset == 0 {
            return i;
        }
        let (head, tail) = self.pieces[i].split(offset);
        self.pieces[i] = head;
        self.pieces.insert(i + 1, tail);
        i + 1
    }

    /// Add one staged slot at piece position `at`, merging with a staged neighbour
    fn push_staged(&mut self, at: usize) {
        if at > 0 {
            if let Some(Piece::Staged { len }) = self.pieces.get_mut(at - 1) {
                *len += 1;
                return;
            }
        }
        if let Some(Piece::Staged { len }) = self.pieces.get_mut(at) {
            *len += 1;
            return;
        }
        self.pieces.insert(at, Piece::Staged { len: 1 });
    }

    fn encode(&self, element: &LumpElement) -> LumpResult<Vec<u8>> {
        match element {
            LumpElement::Record(record) => Ok(record.to_bytes()?),
            LumpElement::Byte(b) => Ok(vec![*b]),
            LumpElement::Undecoded(bytes) => Ok(bytes.clone()),
        }
    }

    /// Serialize every element in index order, overlay included
    pub fn materialize(&self) -> LumpResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len * self.record_size);
        let mut base = 0;
        for piece in &self.pieces {
            match *piece {
                Piece::Source { start, len } => {
                    let mut run = self
                        .segment
                        .read((start * self.record_size) as u64, len * self.record_size)?;
                    for (index, element) in self.overlay.range(base..base + len) {
                        let at = (index - base) * self.record_size;
                        let bytes = self.encode(element)?;
                        run[at..at + self.record_size].copy_from_slice(&bytes);
                    }
                    out.extend_from_slice(&run);
                }
                Piece::Staged { len } => {
                    for index in base..base + len {
                        let element = self.overlay.get(&index).ok_or(LumpError::IndexOutOfRange {
                            index: index as isize,
                            len: self.len,
                        })?;
                        out.extend_from_slice(&self.encode(element)?);
                    }
                }
            }
            base += piece.len();
        }
        Ok(out)
    }

    /// Name of the only field, when records are a single primitive
    ///
    /// Such lumps (indices, face lists) read more naturally as bare values
    /// through [`scalar`](Self::scalar) and [`set_scalar`](Self::set_scalar).
    pub fn scalar_field(&self) -> Option<&str> {
        match self.layout.as_deref()?.fields() {
            [field] if matches!(field.kind(), FieldKind::Scalar(_)) => Some(field.name()),
            _ => None,
        }
    }

    fn scalar_layout(&self) -> LumpResult<&Arc<FieldLayout>> {
        match &self.layout {
            Some(layout) if self.scalar_field().is_some() => Ok(layout),
            Some(layout) => Err(LumpError::ElementMismatch {
                expected: "single value record".to_string(),
                actual: format!("{} record with {} fields", layout.name(), layout.fields().len()),
            }),
            None => Err(LumpError::ElementMismatch {
                expected: "single value record".to_string(),
                actual: "byte".to_string(),
            }),
        }
    }

    /// Bare value at `index` of a single-field lump
    pub fn scalar(&self, index: isize) -> LumpResult<Value> {
        self.scalar_layout()?;
        let record = self.record(index)?;
        record.values().first().cloned().ok_or(LumpError::ElementMismatch {
            expected: "single value record".to_string(),
            actual: "empty record".to_string(),
        })
    }

    /// Every bare value of a single-field lump
    pub fn scalars(&self) -> LumpResult<Vec<Value>> {
        (0..self.len as isize).map(|i| self.scalar(i)).collect()
    }

    /// Stage a bare value at `index` of a single-field lump
    ///
    /// The value is checked against the field type before it is staged.
    pub fn set_scalar(&mut self, index: isize, value: impl Into<Value>) -> LumpResult<()> {
        let layout = Arc::clone(self.scalar_layout()?);
        let mut record = layout.default_record();
        let name = layout.fields()[0].name().to_string();
        record.set(&name, value)?;
        record.to_bytes()?;
        self.set(index, record)
    }

    /// Indices and causes of every record that fails to decode
    ///
    /// Reads the whole lump. Overlay elements are already decoded and never fail.
    pub fn decode_failures(&self) -> LumpResult<Vec<(usize, LayoutError)>> {
        let mut failures = Vec::new();
        if self.layout.is_none() {
            return Ok(failures);
        }
        for element in self.iter() {
            match element {
                Ok(_) => {}
                Err(LumpError::RecordDecodeError { index, cause }) => failures.push((index, cause)),
                Err(e) => return Err(e),
            }
        }
        Ok(failures)
    }

    /// Every record, failing on the first decode error
    pub fn records(&self) -> LumpResult<Vec<Record>> {
        (0..self.len as isize).map(|i| self.record(i)).collect()
    }

    /// Indices of records whose field at `path` equals `value`
    ///
    /// Records that fail to decode are skipped unless the lump is strict.
    pub fn search(&self, path: &str, value: &Value) -> LumpResult<Vec<usize>> {
        if self.layout.is_none() {
            return Err(LumpError::ElementMismatch {
                expected: "record lump".to_string(),
                actual: "byte lump".to_string(),
            });
        }
        let mut found = Vec::new();
        for (index, element) in self.iter().enumerate() {
            let element = match element {
                Ok(element) => element,
                Err(e @ LumpError::RecordDecodeError { .. }) if self.strict => return Err(e),
                Err(LumpError::RecordDecodeError { .. }) => continue,
                Err(e) => return Err(e),
            };
            let hit = element
                .as_record()
                .and_then(|r| r.get_path(path))
                .is_some_and(|field| field.loosely_equals(value));
            if hit {
                found.push(index);
            }
        }
        Ok(found)
    }
}

impl fmt::Display for LazyLump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layout {
            Some(layout) => write!(f, "<{} ({} {})>", self.name, self.len, layout.name()),
            None => write!(f, "<{} ({} bytes)>", self.name, self.len),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use lumpkit_formats::layout::{Coercion, EnumSpec, Primitive};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn edge() -> Arc<FieldLayout> {
        FieldLayout::builder("Edge", 4)
            .array("vertices", Primitive::U16, 2)
            .build()
            .unwrap()
    }

    fn edges(count: u16) -> Segment {
        let bytes: Vec<u8> = (0..count)
            .flat_map(|i| {
                let mut b = (i * 2).to_le_bytes().to_vec();
                b.extend_from_slice(&(i * 2 + 1).to_le_bytes());
                b
            })
            .collect();
        Segment::from_bytes(bytes)
    }

    fn first_vertex(element: &LumpElement) -> u64 {
        element
            .as_record()
            .unwrap()
            .get_path("vertices.0")
            .unwrap()
            .as_u64()
            .unwrap()
    }

    fn edge_record(layout: &Arc<FieldLayout>, a: u16) -> Record {
        let mut record = layout.default_record();
        record.set_path("vertices.0", a).unwrap();
        record
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(Slice::full().indices(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(Slice::reversed().indices(3).unwrap(), vec![2, 1, 0]);
        assert_eq!(Slice::from(1..3).indices(5).unwrap(), vec![1, 2]);
        assert_eq!(Slice::from(3..).indices(5).unwrap(), vec![3, 4]);
        assert_eq!(Slice::from(..2).indices(5).unwrap(), vec![0, 1]);
        assert_eq!(Slice::from(1..=2).indices(5).unwrap(), vec![1, 2]);
        assert_eq!(Slice::new(Some(-2), None, None).indices(5).unwrap(), vec![3, 4]);
        assert_eq!(Slice::new(None, None, Some(2)).indices(5).unwrap(), vec![0, 2, 4]);
        assert_eq!(Slice::new(Some(10), Some(2), Some(-3)).indices(8).unwrap(), vec![7, 4]);
        assert_eq!(Slice::from(2..100).indices(4).unwrap(), vec![2, 3]);
        assert!(Slice::from(3..1).indices(5).unwrap().is_empty());
        assert_eq!(Slice::new(Some(1), None, Some(isize::MAX)).indices(5).unwrap(), vec![1]);
        assert_eq!(Slice::new(Some(3), None, Some(isize::MIN)).indices(5).unwrap(), vec![3]);
        assert_eq!(Slice::new(None, None, Some(isize::MIN)).indices(5).unwrap(), vec![4]);
        assert!(matches!(
            Slice::new(None, None, Some(0)).indices(5),
            Err(LumpError::InvalidSlice(_))
        ));
    }

    #[test]
    fn test_typed_access() {
        let lump = LazyLump::typed("EDGES", edges(4), edge()).unwrap();
        assert_eq!(lump.len(), 4);
        assert_eq!(first_vertex(&lump.get(0).unwrap()), 0);
        assert_eq!(first_vertex(&lump.get(-1).unwrap()), 6);
        assert!(matches!(
            lump.get(4),
            Err(LumpError::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(matches!(lump.get(-5), Err(LumpError::IndexOutOfRange { .. })));
        let slice = lump.get_slice(Slice::reversed()).unwrap();
        assert_eq!(slice.iter().map(first_vertex).collect::<Vec<_>>(), vec![6, 4, 2, 0]);
        assert!(!lump.is_modified());
    }

    #[test]
    fn test_record_size_mismatch() {
        let segment = Segment::from_bytes(vec![0u8; 14]);
        assert!(matches!(
            LazyLump::typed("EDGES", segment.clone(), edge()),
            Err(LumpError::RecordSizeMismatch {
                length: 14,
                record_size: 4
            })
        ));
        let raw = LazyLump::raw("EDGES", segment);
        assert_eq!(raw.len(), 14);
        assert!(!raw.is_typed());
    }

    #[test]
    fn test_read_your_writes() {
        let layout = edge();
        let mut lump = LazyLump::typed("EDGES", edges(3), Arc::clone(&layout)).unwrap();
        lump.set(1, edge_record(&layout, 99)).unwrap();
        assert_eq!(first_vertex(&lump.get(1).unwrap()), 99);
        assert!(lump.is_modified());
        assert_eq!(lump.overlay_indices(), vec![1]);

        assert!(matches!(lump.set(3, edge_record(&layout, 1)), Err(LumpError::IndexOutOfRange { .. })));
        assert!(matches!(lump.set(0, 7u8), Err(LumpError::ElementMismatch { .. })));

        let bytes = lump.materialize().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[4..6], &99u16.to_le_bytes());
        // source bytes are untouched
        assert_eq!(&lump.segment().read_all().unwrap()[4..6], &2u16.to_le_bytes());
    }

    #[test]
    fn test_overlay_remap_on_insert_and_delete() {
        let mut lump = LazyLump::raw("RAW", Segment::from_bytes((0u8..12).collect::<Vec<_>>()));
        for index in [2, 5, 9] {
            lump.set(index, 100 + index as u8).unwrap();
        }

        let mut inserted = lump.clone();
        inserted.insert(4, 200u8).unwrap();
        assert_eq!(inserted.overlay_indices(), vec![2, 4, 6, 10]);
        assert_eq!(inserted.len(), 13);
        assert_eq!(inserted.get(6).unwrap(), LumpElement::Byte(105));
        assert_eq!(inserted.get(5).unwrap(), LumpElement::Byte(4));

        let mut deleted = lump.clone();
        deleted.delete(4).unwrap();
        assert_eq!(deleted.overlay_indices(), vec![2, 4, 8]);
        assert_eq!(deleted.len(), 11);
        assert_eq!(deleted.get(4).unwrap(), LumpElement::Byte(105));
        assert_eq!(deleted.get(3).unwrap(), LumpElement::Byte(3));
        assert_eq!(deleted.get(5).unwrap(), LumpElement::Byte(6));
    }

    #[test]
    fn test_delete_slice_shifts_survivors() {
        let mut lump = LazyLump::raw("RAW", Segment::from_bytes((0u8..10).collect::<Vec<_>>()));
        lump.set(9, 90u8).unwrap();
        lump.delete_slice(Slice::new(Some(1), Some(8), Some(3))).unwrap();
        assert_eq!(lump.materialize().unwrap(), vec![0, 2, 3, 5, 6, 8, 90]);
        assert_eq!(lump.overlay_indices(), vec![6]);
    }

    #[test]
    fn test_append_pop_extend() {
        let mut lump = LazyLump::raw("RAW", Segment::from_bytes(vec![1, 2]));
        lump.append(3u8).unwrap();
        lump.extend([4u8, 5]).unwrap();
        assert_eq!(lump.materialize().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(lump.pop(-1).unwrap(), LumpElement::Byte(5));
        assert_eq!(lump.pop(0).unwrap(), LumpElement::Byte(1));
        assert_eq!(lump.materialize().unwrap(), vec![2, 3, 4]);
        lump.insert(-100, 0u8).unwrap();
        lump.insert(100, 9u8).unwrap();
        assert_eq!(lump.materialize().unwrap(), vec![0, 2, 3, 4, 9]);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let layout = edge();
        let mut lump = LazyLump::typed("EDGES", edges(5), Arc::clone(&layout)).unwrap();
        lump.insert(2, edge_record(&layout, 42)).unwrap();
        lump.delete(0).unwrap();
        let first = lump.materialize().unwrap();
        let second = lump.materialize().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5 * 4);

        let reread = LazyLump::typed("EDGES", Segment::from_bytes(first), layout).unwrap();
        let firsts: Vec<u64> = reread.iter().map(|e| first_vertex(&e.unwrap())).collect();
        assert_eq!(firsts, vec![2, 42, 4, 6, 8]);
    }

    #[test]
    fn test_empty_lump_from_records() {
        let layout = edge();
        let mut lump = LazyLump::empty("EDGES", Arc::clone(&layout));
        assert!(lump.is_empty());
        lump.append(edge_record(&layout, 1)).unwrap();
        lump.append(edge_record(&layout, 2)).unwrap();
        assert_eq!(lump.materialize().unwrap(), vec![1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(lump.records().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_errors_are_per_record() {
        let side = Arc::new(EnumSpec::closed("Side", &[("FRONT", 0), ("BACK", 1)]));
        let layout = FieldLayout::builder("Portal", 1)
            .scalar("side", Primitive::U8)
            .coerce("side", Coercion::Enum(side))
            .build()
            .unwrap();
        let segment = Segment::from_bytes(vec![0, 7, 1]);
        let lenient = LazyLump::typed("PORTALS", segment.clone(), Arc::clone(&layout)).unwrap();

        let results: Vec<_> = lenient.iter().collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(LumpError::RecordDecodeError { index: 1, .. })
        ));
        assert!(results[2].is_ok());

        let slice = lenient.get_slice(..).unwrap();
        assert_eq!(slice[1], LumpElement::Undecoded(vec![7]));

        let failures = lenient.decode_failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], (1, LayoutError::UnknownVariant { .. })));

        let strict = LazyLump::typed("PORTALS", segment, layout).unwrap().with_strict(true);
        assert!(matches!(
            strict.get_slice(..),
            Err(LumpError::RecordDecodeError { index: 1, .. })
        ));
    }

    #[test]
    fn test_search() {
        let layout = edge();
        let mut lump = LazyLump::typed("EDGES", edges(4), Arc::clone(&layout)).unwrap();
        assert_eq!(lump.search("vertices.0", &Value::UInt(4)).unwrap(), vec![2]);
        lump.set(0, edge_record(&layout, 4)).unwrap();
        assert_eq!(lump.search("vertices.0", &Value::Int(4)).unwrap(), vec![0, 2]);
        assert!(lump.search("missing", &Value::Int(4)).unwrap().is_empty());

        let raw = LazyLump::raw("RAW", Segment::from_bytes(vec![1]));
        assert!(raw.search("x", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_scalar_view() {
        let layout = FieldLayout::builder("MeshIndex", 2)
            .scalar("index", Primitive::U16)
            .build()
            .unwrap();
        let mut lump = LazyLump::typed("MESH_INDICES", Segment::from_bytes(vec![3, 0, 7, 0]), layout).unwrap();
        assert_eq!(lump.scalar_field(), Some("index"));
        assert_eq!(lump.scalars().unwrap(), vec![Value::UInt(3), Value::UInt(7)]);
        assert_eq!(lump.scalar(-1).unwrap(), Value::UInt(7));

        lump.set_scalar(1, 9u32).unwrap();
        assert_eq!(lump.scalar(1).unwrap(), Value::UInt(9));
        assert_eq!(lump.materialize().unwrap(), vec![3, 0, 9, 0]);

        // the value must fit the field
        assert!(matches!(
            lump.set_scalar(0, 70_000u32),
            Err(LumpError::Layout(LayoutError::TypeMismatch { .. }))
        ));
        assert_eq!(lump.scalar(0).unwrap(), Value::UInt(3));
        assert!(matches!(lump.set_scalar(2, 1u32), Err(LumpError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_scalar_view_needs_one_primitive() {
        let lump = LazyLump::typed("EDGES", edges(2), edge()).unwrap();
        assert_eq!(lump.scalar_field(), None);
        assert!(matches!(lump.scalar(0), Err(LumpError::ElementMismatch { .. })));

        let raw = LazyLump::raw("RAW", Segment::from_bytes(vec![1, 2]));
        assert!(matches!(raw.scalars(), Err(LumpError::ElementMismatch { .. })));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(usize, u8),
        Insert(usize, u8),
        Delete(usize),
        Append(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..64, any::<u8>()).prop_map(|(i, v)| Op::Set(i, v)),
            (0usize..64, any::<u8>()).prop_map(|(i, v)| Op::Insert(i, v)),
            (0usize..64).prop_map(Op::Delete),
            any::<u8>().prop_map(Op::Append),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_vec_model(
            initial in prop::collection::vec(any::<u8>(), 0..32),
            ops in prop::collection::vec(op(), 0..40),
        ) {
            let mut model = initial.clone();
            let mut lump = LazyLump::raw("RAW", Segment::from_bytes(initial));
            for op in ops {
                match op {
                    Op::Set(i, v) if !model.is_empty() => {
                        let i = i % model.len();
                        model[i] = v;
                        lump.set(i as isize, v).unwrap();
                    }
                    Op::Insert(i, v) => {
                        let i = i % (model.len() + 1);
                        model.insert(i, v);
                        lump.insert(i as isize, v).unwrap();
                    }
                    Op::Delete(i) if !model.is_empty() => {
                        let i = i % model.len();
                        model.remove(i);
                        lump.delete(i as isize).unwrap();
                    }
                    Op::Append(v) => {
                        model.push(v);
                        lump.append(v).unwrap();
                    }
                    Op::Set(..) | Op::Delete(_) => {}
                }
                prop_assert_eq!(lump.len(), model.len());
            }
            prop_assert_eq!(lump.materialize().unwrap(), model.clone());
            let read: Vec<u8> = lump.iter().map(|e| e.unwrap().as_byte().unwrap()).collect();
            prop_assert_eq!(read, model);
        }
    }
}
