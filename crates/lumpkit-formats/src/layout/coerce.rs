//! Coercion hooks between raw decoded values and domain types
//!
//! A field may carry one [`Coercion`]. On decode the raw integer (or raw
//! array) is handed to [`Coerce::to_domain`]; on encode the domain value goes
//! back through [`Coerce::to_raw`] before being range-checked against the
//! field's primitive width.

use super::error::{LayoutError, LayoutResult};
use super::record::Value;
use std::fmt;
use std::sync::Arc;

/// Conversion capability implemented by every coerced type
pub trait Coerce {
    /// Wrap a raw decoded value into its domain representation
    fn to_domain(&self, field: &str, raw: Value) -> LayoutResult<Value>;

    /// Unwrap a domain value back into a raw value ready for encoding
    fn to_raw(&self, field: &str, value: &Value) -> LayoutResult<Value>;
}

/// Named integer variants
///
/// A closed enum rejects raw values without a variant. An open enum keeps
/// them as anonymous values, which is how branches model reserved ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    name: String,
    variants: Vec<(String, i64)>,
    open: bool,
}

impl EnumSpec {
    /// Create a closed enum
    pub fn closed(name: impl Into<String>, variants: &[(&str, i64)]) -> Self {
        Self {
            name: name.into(),
            variants: variants
                .iter()
                .map(|(n, v)| ((*n).to_string(), *v))
                .collect(),
            open: false,
        }
    }

    /// Create an open enum that keeps unknown raw values
    pub fn open(name: impl Into<String>, variants: &[(&str, i64)]) -> Self {
        Self {
            open: true,
            ..Self::closed(name, variants)
        }
    }

    /// Enum name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether unknown raw values are accepted
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Variant name for a raw value
    pub fn variant_name(&self, raw: i64) -> Option<&str> {
        self.variants
            .iter()
            .find(|(_, v)| *v == raw)
            .map(|(n, _)| n.as_str())
    }

    /// Raw value for a variant name
    pub fn variant_value(&self, name: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// A decoded enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    spec: Arc<EnumSpec>,
    raw: i64,
}

impl EnumValue {
    /// Look up a variant by name
    pub fn named(spec: &Arc<EnumSpec>, name: &str) -> Option<Self> {
        spec.variant_value(name).map(|raw| Self {
            spec: Arc::clone(spec),
            raw,
        })
    }

    /// Raw integer value
    pub const fn raw(&self) -> i64 {
        self.raw
    }

    /// Variant name, `None` for unknown values of an open enum
    pub fn name(&self) -> Option<&str> {
        self.spec.variant_name(self.raw)
    }

    /// The enum definition this value belongs to
    pub fn spec(&self) -> &Arc<EnumSpec> {
        &self.spec
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}.{}", self.spec.name, name),
            None => write!(f, "{}({})", self.spec.name, self.raw),
        }
    }
}

/// Named bit flags; never rejects a raw value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSpec {
    name: String,
    flags: Vec<(String, u64)>,
}

impl FlagSpec {
    /// Create a flag set definition
    pub fn new(name: impl Into<String>, flags: &[(&str, u64)]) -> Self {
        Self {
            name: name.into(),
            flags: flags
                .iter()
                .map(|(n, v)| ((*n).to_string(), *v))
                .collect(),
        }
    }

    /// Flag set name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mask for a named flag
    pub fn mask(&self, name: &str) -> Option<u64> {
        self.flags.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// A decoded flag set value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSet {
    spec: Arc<FlagSpec>,
    bits: u64,
}

impl FlagSet {
    /// Create a flag set from raw bits
    pub fn from_bits(spec: &Arc<FlagSpec>, bits: u64) -> Self {
        Self {
            spec: Arc::clone(spec),
            bits,
        }
    }

    /// Raw bits
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Check whether a named flag is set; unknown names are never set
    pub fn contains(&self, name: &str) -> bool {
        self.spec
            .mask(name)
            .is_some_and(|mask| mask != 0 && self.bits & mask == mask)
    }

    /// Set or clear a named flag
    pub fn set(&mut self, name: &str, on: bool) -> bool {
        let Some(mask) = self.spec.mask(name) else {
            return false;
        };
        if on {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
        true
    }

    /// Names of all set flags, in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.spec
            .flags
            .iter()
            .filter(|(_, mask)| *mask != 0 && self.bits & mask == *mask)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.spec.name, self.names().join("|"))
    }
}

/// Three component vector decoded from a three element array
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl Vec3 {
    /// Create a vector
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Coercion attached to a field, selected by variant
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Integer to enum variant
    Enum(Arc<EnumSpec>),
    /// Integer to flag set
    Flags(Arc<FlagSpec>),
    /// Three element array to [`Vec3`]
    Vec3,
}

impl Coercion {
    /// Whether this coercion applies to integers (as opposed to arrays)
    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::Enum(_) | Self::Flags(_))
    }
}

fn raw_integer(field: &str, raw: &Value) -> LayoutResult<i128> {
    raw.as_i128().ok_or_else(|| LayoutError::TypeMismatch {
        field: field.to_string(),
        reason: format!("expected an integer, got {}", raw.kind_name()),
    })
}

impl Coerce for Arc<EnumSpec> {
    fn to_domain(&self, field: &str, raw: Value) -> LayoutResult<Value> {
        let value = raw_integer(field, &raw)?;
        let value = i64::try_from(value).map_err(|_| LayoutError::TypeMismatch {
            field: field.to_string(),
            reason: format!("{value} does not fit an enum value"),
        })?;
        if self.variant_name(value).is_none() && !self.open {
            return Err(LayoutError::UnknownVariant {
                field: field.to_string(),
                enumeration: self.name.clone(),
                value,
            });
        }
        Ok(Value::Enum(EnumValue {
            spec: Arc::clone(self),
            raw: value,
        }))
    }

    fn to_raw(&self, field: &str, value: &Value) -> LayoutResult<Value> {
        match value {
            Value::Enum(e) => {
                if e.spec.name != self.name {
                    return Err(LayoutError::TypeMismatch {
                        field: field.to_string(),
                        reason: format!("expected {} value, got {}", self.name, e.spec.name),
                    });
                }
                Ok(Value::Int(e.raw))
            }
            // raw assignment bypasses the enum
            Value::Int(_) | Value::UInt(_) => Ok(value.clone()),
            other => Err(LayoutError::TypeMismatch {
                field: field.to_string(),
                reason: format!("expected {} value, got {}", self.name, other.kind_name()),
            }),
        }
    }
}

impl Coerce for Arc<FlagSpec> {
    fn to_domain(&self, field: &str, raw: Value) -> LayoutResult<Value> {
        let value = raw_integer(field, &raw)?;
        Ok(Value::Flags(FlagSet {
            spec: Arc::clone(self),
            // sign-extended negatives keep their bit pattern
            bits: value as u64,
        }))
    }

    fn to_raw(&self, field: &str, value: &Value) -> LayoutResult<Value> {
        match value {
            Value::Flags(flags) => Ok(Value::UInt(flags.bits)),
            Value::Int(_) | Value::UInt(_) => Ok(value.clone()),
            other => Err(LayoutError::TypeMismatch {
                field: field.to_string(),
                reason: format!("expected {} flags, got {}", self.name, other.kind_name()),
            }),
        }
    }
}

/// [`Coerce`] implementation for [`Vec3`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Vec3Coercion;

impl Coerce for Vec3Coercion {
    fn to_domain(&self, field: &str, raw: Value) -> LayoutResult<Value> {
        let components = match &raw {
            Value::Array(items) if items.len() == 3 => items
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>(),
            _ => None,
        };
        match components.as_deref() {
            Some(&[x, y, z]) => Ok(Value::Vector(Vec3::new(x, y, z))),
            _ => Err(LayoutError::TypeMismatch {
                field: field.to_string(),
                reason: format!("expected a 3 element numeric array, got {}", raw.kind_name()),
            }),
        }
    }

    fn to_raw(&self, field: &str, value: &Value) -> LayoutResult<Value> {
        match value {
            Value::Vector(v) => Ok(Value::Array(vec![
                Value::Float(v.x),
                Value::Float(v.y),
                Value::Float(v.z),
            ])),
            Value::Array(items) if items.len() == 3 => Ok(value.clone()),
            other => Err(LayoutError::TypeMismatch {
                field: field.to_string(),
                reason: format!("expected a vector, got {}", other.kind_name()),
            }),
        }
    }
}

impl Coerce for Coercion {
    fn to_domain(&self, field: &str, raw: Value) -> LayoutResult<Value> {
        match self {
            Self::Enum(spec) => spec.to_domain(field, raw),
            Self::Flags(spec) => spec.to_domain(field, raw),
            Self::Vec3 => Vec3Coercion.to_domain(field, raw),
        }
    }

    fn to_raw(&self, field: &str, value: &Value) -> LayoutResult<Value> {
        match self {
            Self::Enum(spec) => spec.to_raw(field, value),
            Self::Flags(spec) => spec.to_raw(field, value),
            Self::Vec3 => Vec3Coercion.to_raw(field, value),
        }
    }
}
