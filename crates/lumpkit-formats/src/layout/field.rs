//! Declarative fixed-size record layouts
//!
//! A [`FieldLayout`] lists named fields in on-disk order. Layouts are built
//! once through [`FieldLayoutBuilder`], which runs the size self-check, and
//! then shared behind an `Arc` by every record decoded with them.

use super::bitfield::BitLayout;
use super::coerce::{Coerce, Coercion};
use super::error::{LayoutError, LayoutResult};
use super::record::{Record, Value};
use binrw::io::{Cursor, Read, Seek, Write};
use binrw::{BinRead, BinWrite, Endian};
use std::sync::Arc;

/// Scalar field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// Fixed-length byte string
    Bytes(usize),
}

impl Primitive {
    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Bytes(n) => n,
        }
    }

    /// Inclusive integer range, `None` for floats and byte strings
    pub const fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Self::I8 => Some((i8::MIN as i128, i8::MAX as i128)),
            Self::I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Self::I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Self::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            Self::U8 => Some((0, u8::MAX as i128)),
            Self::U16 => Some((0, u16::MAX as i128)),
            Self::U32 => Some((0, u32::MAX as i128)),
            Self::U64 => Some((0, u64::MAX as i128)),
            Self::F32 | Self::F64 | Self::Bytes(_) => None,
        }
    }

    /// Zero value of this type
    pub fn zero(self) -> Value {
        match self {
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => Value::Int(0),
            Self::U8 | Self::U16 | Self::U32 | Self::U64 => Value::UInt(0),
            Self::F32 | Self::F64 => Value::Float(0.0),
            Self::Bytes(n) => Value::Bytes(vec![0; n]),
        }
    }

    /// Read one value
    pub fn read<R: Read + Seek>(self, reader: &mut R, endian: Endian) -> LayoutResult<Value> {
        let value = match self {
            Self::I8 => Value::Int(i64::from(i8::read_options(reader, endian, ())?)),
            Self::I16 => Value::Int(i64::from(i16::read_options(reader, endian, ())?)),
            Self::I32 => Value::Int(i64::from(i32::read_options(reader, endian, ())?)),
            Self::I64 => Value::Int(i64::read_options(reader, endian, ())?),
            Self::U8 => Value::UInt(u64::from(u8::read_options(reader, endian, ())?)),
            Self::U16 => Value::UInt(u64::from(u16::read_options(reader, endian, ())?)),
            Self::U32 => Value::UInt(u64::from(u32::read_options(reader, endian, ())?)),
            Self::U64 => Value::UInt(u64::read_options(reader, endian, ())?),
            Self::F32 => Value::Float(f64::from(f32::read_options(reader, endian, ())?)),
            Self::F64 => Value::Float(f64::read_options(reader, endian, ())?),
            Self::Bytes(n) => {
                let mut buf = vec![0u8; n];
                reader.read_exact(&mut buf)?;
                Value::Bytes(buf)
            }
        };
        Ok(value)
    }

    /// Write one value, failing if it does not fit this type
    pub fn write<W: Write + Seek>(
        self,
        field: &str,
        value: &Value,
        writer: &mut W,
        endian: Endian,
    ) -> LayoutResult<()> {
        if let Self::Bytes(n) = self {
            let Value::Bytes(bytes) = value else {
                return Err(mismatch(field, format!("expected bytes, got {}", value.kind_name())));
            };
            if bytes.len() > n {
                return Err(mismatch(
                    field,
                    format!("{} bytes do not fit a {n} byte string", bytes.len()),
                ));
            }
            writer.write_all(bytes)?;
            // pad short strings with NULs
            writer.write_all(&vec![0u8; n - bytes.len()])?;
            return Ok(());
        }

        if matches!(self, Self::F32 | Self::F64) {
            let Some(float) = value.as_f64() else {
                return Err(mismatch(field, format!("expected a number, got {}", value.kind_name())));
            };
            if self == Self::F32 {
                let narrow = float as f32;
                if float.is_finite() && narrow.is_infinite() {
                    return Err(mismatch(field, format!("{float} is out of range for F32")));
                }
                narrow.write_options(writer, endian, ())?;
            } else {
                float.write_options(writer, endian, ())?;
            }
            return Ok(());
        }

        let Some(int) = value.as_i128() else {
            return Err(mismatch(field, format!("expected an integer, got {}", value.kind_name())));
        };
        if let Some((min, max)) = self.int_range() {
            if int < min || int > max {
                return Err(mismatch(field, format!("{int} is out of range for {self:?}")));
            }
        }
        match self {
            Self::I8 => (int as i8).write_options(writer, endian, ())?,
            Self::I16 => (int as i16).write_options(writer, endian, ())?,
            Self::I32 => (int as i32).write_options(writer, endian, ())?,
            Self::I64 => (int as i64).write_options(writer, endian, ())?,
            Self::U8 => (int as u8).write_options(writer, endian, ())?,
            Self::U16 => (int as u16).write_options(writer, endian, ())?,
            Self::U32 => (int as u32).write_options(writer, endian, ())?,
            Self::U64 => (int as u64).write_options(writer, endian, ())?,
            Self::F32 | Self::F64 | Self::Bytes(_) => {}
        }
        Ok(())
    }
}

fn mismatch(field: &str, reason: String) -> LayoutError {
    LayoutError::TypeMismatch {
        field: field.to_string(),
        reason,
    }
}

/// What a field is made of
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// One primitive value
    Scalar(Primitive),
    /// `count` consecutive primitives
    Array {
        /// Element type
        element: Primitive,
        /// Number of elements
        count: usize,
    },
    /// Embedded sub-record
    Nested(Arc<FieldLayout>),
    /// Bit-packed integer
    Bits(Arc<BitLayout>),
}

impl FieldKind {
    /// Size in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar(p) => p.size(),
            Self::Array { element, count } => element.size() * count,
            Self::Nested(layout) => layout.size(),
            Self::Bits(bits) => bits.width().bytes(),
        }
    }
}

/// A named field with an optional coercion hook
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    coercion: Option<Coercion>,
}

impl FieldDef {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field kind
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Coercion hook, if any
    pub const fn coercion(&self) -> Option<&Coercion> {
        self.coercion.as_ref()
    }

    /// Zero value, coerced where the hook accepts zero
    fn zero(&self) -> Value {
        let raw = match &self.kind {
            FieldKind::Scalar(p) => p.zero(),
            FieldKind::Array { element, count } => Value::Array(vec![element.zero(); *count]),
            FieldKind::Nested(layout) => Value::Record(layout.default_record()),
            FieldKind::Bits(bits) => Value::Bits(bits.zeroed()),
        };
        match &self.coercion {
            Some(coercion) => coercion.to_domain(&self.name, raw.clone()).unwrap_or(raw),
            None => raw,
        }
    }
}

/// Description of a fixed-size binary record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    name: String,
    size: usize,
    endian: Endian,
    fields: Vec<FieldDef>,
}

impl FieldLayout {
    /// Start defining a layout of `size` bytes
    pub fn builder(name: impl Into<String>, size: usize) -> FieldLayoutBuilder {
        FieldLayoutBuilder {
            layout: Self {
                name: name.into(),
                size,
                endian: Endian::Little,
                fields: Vec::new(),
            },
            error: None,
        }
    }

    /// Layout name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared record size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Byte order of every primitive in the record
    pub const fn endian(&self) -> Endian {
        self.endian
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Position of a field
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check sizes and definitions, recursing into nested layouts
    pub fn validate(&self) -> LayoutResult<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(LayoutError::InvalidDefinition {
                    layout: self.name.clone(),
                    reason: format!("duplicate field {}", field.name),
                });
            }
            match &field.kind {
                FieldKind::Nested(layout) => layout.validate()?,
                FieldKind::Bits(bits) => bits.validate()?,
                FieldKind::Scalar(_) | FieldKind::Array { .. } => {}
            }
            if let Some(coercion) = &field.coercion {
                let fits = match (&field.kind, coercion) {
                    (FieldKind::Array { count: 3, element }, Coercion::Vec3) => {
                        !matches!(element, Primitive::Bytes(_))
                    }
                    (FieldKind::Scalar(p), Coercion::Enum(_) | Coercion::Flags(_)) => {
                        p.int_range().is_some()
                    }
                    _ => false,
                };
                if !fits {
                    return Err(LayoutError::InvalidDefinition {
                        layout: self.name.clone(),
                        reason: format!("coercion {coercion:?} does not apply to field {}", field.name),
                    });
                }
            }
        }
        let computed: usize = self.fields.iter().map(|f| f.kind.size()).sum();
        if computed != self.size {
            return Err(LayoutError::LayoutSizeCheck {
                layout: self.name.clone(),
                declared: self.size,
                computed,
            });
        }
        Ok(())
    }

    /// Record with every field zeroed
    pub fn default_record(self: &Arc<Self>) -> Record {
        Record::from_parts(Arc::clone(self), self.fields.iter().map(FieldDef::zero).collect())
    }

    /// Decode exactly one record
    pub fn decode(self: &Arc<Self>, bytes: &[u8]) -> LayoutResult<Record> {
        if bytes.len() != self.size {
            return Err(LayoutError::SizeMismatch {
                layout: self.name.clone(),
                expected: self.size,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        self.read_record(&mut cursor)
    }

    fn read_record<R: Read + Seek>(self: &Arc<Self>, reader: &mut R) -> LayoutResult<Record> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let raw = match &field.kind {
                FieldKind::Scalar(p) => p.read(reader, self.endian)?,
                FieldKind::Array { element, count } => Value::Array(
                    (0..*count)
                        .map(|_| element.read(reader, self.endian))
                        .collect::<LayoutResult<Vec<_>>>()?,
                ),
                FieldKind::Nested(layout) => Value::Record(layout.read_record(reader)?),
                FieldKind::Bits(bits) => {
                    let raw = bits.width().primitive().read(reader, self.endian)?;
                    let raw = raw.as_u64().unwrap_or_default();
                    Value::Bits(bits.decode(raw)?)
                }
            };
            let value = match &field.coercion {
                Some(coercion) => coercion.to_domain(&field.name, raw)?,
                None => raw,
            };
            values.push(value);
        }
        Ok(Record::from_parts(Arc::clone(self), values))
    }

    /// Whether `other` is this layout, by identity or field for field
    fn same_layout(&self, other: &Arc<Self>) -> bool {
        std::ptr::eq(self, Arc::as_ptr(other)) || self == other.as_ref()
    }

    /// Encode one record into exactly [`size`](Self::size) bytes
    pub fn encode(&self, record: &Record) -> LayoutResult<Vec<u8>> {
        if !self.same_layout(record.layout()) {
            return Err(mismatch(
                &self.name,
                format!("record of layout {} cannot be encoded as {}", record.layout().name(), self.name),
            ));
        }
        let mut cursor = Cursor::new(Vec::with_capacity(self.size));
        self.write_record(record, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    fn write_record<W: Write + Seek>(&self, record: &Record, writer: &mut W) -> LayoutResult<()> {
        for (field, value) in self.fields.iter().zip(record.values()) {
            let raw = match &field.coercion {
                Some(coercion) => coercion.to_raw(&field.name, value)?,
                None => value.clone(),
            };
            match (&field.kind, &raw) {
                (FieldKind::Scalar(p), raw) => p.write(&field.name, raw, writer, self.endian)?,
                (FieldKind::Array { element, count }, Value::Array(items)) => {
                    if items.len() != *count {
                        return Err(mismatch(
                            &field.name,
                            format!("expected {count} elements, got {}", items.len()),
                        ));
                    }
                    for item in items {
                        element.write(&field.name, item, writer, self.endian)?;
                    }
                }
                (FieldKind::Nested(layout), Value::Record(child)) => {
                    if !layout.same_layout(child.layout()) {
                        return Err(mismatch(
                            &field.name,
                            format!("expected {} record, got {}", layout.name(), child.layout().name()),
                        ));
                    }
                    layout.write_record(child, writer)?;
                }
                (FieldKind::Bits(bits), Value::Bits(group)) => {
                    let packed = bits.encode(group)?;
                    bits.width()
                        .primitive()
                        .write(&field.name, &Value::UInt(packed), writer, self.endian)?;
                }
                // raw integer written straight into a bit-packed field
                (FieldKind::Bits(bits), Value::Int(_) | Value::UInt(_)) => {
                    bits.width()
                        .primitive()
                        .write(&field.name, &raw, writer, self.endian)?;
                }
                (_, other) => {
                    return Err(mismatch(
                        &field.name,
                        format!("value of kind {} does not match the field", other.kind_name()),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`FieldLayout`]
#[derive(Debug)]
pub struct FieldLayoutBuilder {
    layout: FieldLayout,
    error: Option<LayoutError>,
}

impl FieldLayoutBuilder {
    fn push(mut self, name: &str, kind: FieldKind) -> Self {
        self.layout.fields.push(FieldDef {
            name: name.to_string(),
            kind,
            coercion: None,
        });
        self
    }

    /// Use big-endian primitives
    pub fn big_endian(mut self) -> Self {
        self.layout.endian = Endian::Big;
        self
    }

    /// Add a scalar field
    pub fn scalar(self, name: &str, primitive: Primitive) -> Self {
        self.push(name, FieldKind::Scalar(primitive))
    }

    /// Add a fixed-length byte string
    pub fn bytes(self, name: &str, len: usize) -> Self {
        self.push(name, FieldKind::Scalar(Primitive::Bytes(len)))
    }

    /// Add an array of `count` primitives
    pub fn array(self, name: &str, element: Primitive, count: usize) -> Self {
        self.push(name, FieldKind::Array { element, count })
    }

    /// Add a nested sub-record
    pub fn nested(self, name: &str, layout: &Arc<FieldLayout>) -> Self {
        self.push(name, FieldKind::Nested(Arc::clone(layout)))
    }

    /// Add a bit-packed integer
    pub fn bits(self, name: &str, layout: &Arc<BitLayout>) -> Self {
        self.push(name, FieldKind::Bits(Arc::clone(layout)))
    }

    /// Attach a coercion hook to an already declared field
    pub fn coerce(mut self, name: &str, coercion: Coercion) -> Self {
        match self.layout.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.coercion = Some(coercion),
            None => {
                self.error.get_or_insert(LayoutError::UnknownField {
                    layout: self.layout.name.clone(),
                    field: name.to_string(),
                });
            }
        }
        self
    }

    /// Validate and freeze the layout
    pub fn build(self) -> LayoutResult<Arc<FieldLayout>> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.layout.validate()?;
        Ok(Arc::new(self.layout))
    }
}
