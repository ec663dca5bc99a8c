//! Decoded records and field values

use super::bitfield::BitRecord;
use super::coerce::{Coerce, EnumValue, FlagSet, Vec3};
use super::error::{LayoutError, LayoutResult};
use super::field::{FieldKind, FieldLayout};
use std::fmt;
use std::sync::Arc;

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point number
    Float(f64),
    /// Fixed-length byte string
    Bytes(Vec<u8>),
    /// Repeated primitive
    Array(Vec<Value>),
    /// Nested sub-record
    Record(Record),
    /// Bit-packed integer
    Bits(BitRecord),
    /// Coerced enum
    Enum(EnumValue),
    /// Coerced flag set
    Flags(FlagSet),
    /// Coerced three component vector
    Vector(Vec3),
}

impl Value {
    /// Short name of the variant, used in error messages
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
            Self::Bits(_) => "bits",
            Self::Enum(_) => "enum",
            Self::Flags(_) => "flags",
            Self::Vector(_) => "vector",
        }
    }

    /// Integer view; integral floats and coerced integers are accepted
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(i128::from(*v)),
            Self::UInt(v) => Some(i128::from(*v)),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i128),
            Self::Enum(e) => Some(i128::from(e.raw())),
            Self::Flags(f) => Some(i128::from(f.bits())),
            _ => None,
        }
    }

    /// Signed integer view
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Unsigned integer view
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Floating point view of any numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Byte string view
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string with trailing NULs removed, decoded lossily as UTF-8
    pub fn as_text(&self) -> Option<String> {
        let bytes = self.as_bytes()?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Nested record view
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Bit group view
    pub const fn as_bits(&self) -> Option<&BitRecord> {
        match self {
            Self::Bits(b) => Some(b),
            _ => None,
        }
    }

    /// Vector view
    pub const fn as_vector(&self) -> Option<Vec3> {
        match self {
            Self::Vector(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values the way they would be encoded
    ///
    /// `UInt(5)`, `Int(5)` and an enum whose raw value is 5 are equal here.
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }
}

macro_rules! value_from {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

value_from!(Int, i64: i8, i16, i32, i64);
value_from!(UInt, u64: u8, u16, u32, u64);
value_from!(Float, f64: f32, f64);

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl From<BitRecord> for Value {
    fn from(v: BitRecord) -> Self {
        Self::Bits(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Self::Enum(v)
    }
}

impl From<FlagSet> for Value {
    fn from(v: FlagSet) -> Self {
        Self::Flags(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Self::Vector(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Record(r) => write!(f, "{r}"),
            Self::Bits(b) => write!(f, "{b}"),
            Self::Enum(e) => write!(f, "{e}"),
            Self::Flags(flags) => write!(f, "{flags}"),
            Self::Vector(v) => write!(f, "{v}"),
        }
    }
}

/// One decoded instance of a [`FieldLayout`]
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    layout: Arc<FieldLayout>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn from_parts(layout: Arc<FieldLayout>, values: Vec<Value>) -> Self {
        Self { layout, values }
    }

    /// Layout this record belongs to
    pub fn layout(&self) -> &Arc<FieldLayout> {
        &self.layout
    }

    /// Values in declaration order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterate `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .fields()
            .iter()
            .map(|f| f.name())
            .zip(&self.values)
    }

    /// Field value by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout.index_of(name).map(|i| &self.values[i])
    }

    /// Mutable field value by name
    ///
    /// Values written through this reference are only checked at encode time.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.layout.index_of(name).map(|i| &mut self.values[i])
    }

    /// Bit group by name
    pub fn bits(&self, name: &str) -> Option<&BitRecord> {
        self.get(name).and_then(Value::as_bits)
    }

    /// Mutable bit group by name
    pub fn bits_mut(&mut self, name: &str) -> Option<&mut BitRecord> {
        match self.get_mut(name) {
            Some(Value::Bits(b)) => Some(b),
            _ => None,
        }
    }

    /// Assign a field
    ///
    /// Raw integers assigned to coerced fields are converted to their domain
    /// form, and raw integers assigned to bit-packed fields are unpacked.
    /// Width checks happen in [`FieldLayout::encode`].
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> LayoutResult<()> {
        let Some(index) = self.layout.index_of(name) else {
            return Err(self.unknown(name));
        };
        let field = &self.layout.fields()[index];
        let mut value = value.into();
        if let (FieldKind::Bits(bits), Value::Int(_) | Value::UInt(_)) = (field.kind(), &value) {
            let max = u64::MAX >> (64 - bits.width().bits());
            let wide = value.as_i128().unwrap_or_default();
            if wide < 0 || wide > i128::from(max) {
                return Err(LayoutError::Overflow {
                    field: name.to_string(),
                    value: wide,
                    max,
                });
            }
            value = Value::Bits(bits.decode(wide as u64)?);
        }
        if let Some(coercion) = field.coercion() {
            let is_raw = matches!(value, Value::Int(_) | Value::UInt(_) | Value::Array(_));
            if is_raw {
                value = coercion.to_domain(name, value)?;
            }
        }
        self.values[index] = value;
        Ok(())
    }

    /// Look up a dotted path such as `"reflectivity.r"`, `"primitive.index"`
    /// or `"normal.2"`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Record(r) => r.get(part)?,
                Value::Bits(b) => b.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Assign through a dotted path
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) -> LayoutResult<()> {
        let Some((head, rest)) = path.split_once('.') else {
            return self.set(path, value);
        };
        let unknown = self.unknown(path);
        match self.get_mut(head) {
            Some(Value::Record(r)) => r.set_path(rest, value),
            Some(Value::Bits(b)) if !rest.contains('.') => b.set(rest, value),
            Some(Value::Array(items)) if !rest.contains('.') => {
                let slot = rest
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or(unknown)?;
                *slot = value.into();
                Ok(())
            }
            _ => Err(unknown),
        }
    }

    /// Encode with the record's own layout
    pub fn to_bytes(&self) -> LayoutResult<Vec<u8>> {
        self.layout.encode(self)
    }

    fn unknown(&self, field: &str) -> LayoutError {
        LayoutError::UnknownField {
            layout: self.layout.name().to_string(),
            field: field.to_string(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.layout.name())?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}
