//! Sub-integer bit fields
//!
//! A [`BitLayout`] splits one unsigned integer into named sub-fields. Fields
//! are packed from the most significant bit downward in declaration order, so
//! `{"unique_contents": 8, "index": 16, "type": 8}` over a `u32` places
//! `unique_contents` in bits 31..24 and `type` in bits 7..0.

use super::coerce::{Coerce, Coercion};
use super::error::{LayoutError, LayoutResult};
use super::field::Primitive;
use super::record::Value;
use std::fmt;
use std::sync::Arc;

/// Width of the integer backing a [`BitLayout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitWidth {
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
}

impl BitWidth {
    /// Number of bits
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
        }
    }

    /// Number of bytes
    pub const fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Primitive used to read and write the backing integer
    pub const fn primitive(self) -> Primitive {
        match self {
            Self::U8 => Primitive::U8,
            Self::U16 => Primitive::U16,
            Self::U32 => Primitive::U32,
            Self::U64 => Primitive::U64,
        }
    }
}

/// One named sub-field of a [`BitLayout`]
#[derive(Debug, Clone, PartialEq)]
pub struct BitField {
    name: String,
    bits: u32,
    coercion: Option<Coercion>,
}

impl BitField {
    /// Sub-field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Largest value this sub-field can hold
    pub const fn max(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1 << self.bits) - 1
        }
    }

    /// Coercion hook, if any
    pub const fn coercion(&self) -> Option<&Coercion> {
        self.coercion.as_ref()
    }
}

/// Named sub-fields packed into one unsigned integer
#[derive(Debug, Clone, PartialEq)]
pub struct BitLayout {
    name: String,
    width: BitWidth,
    fields: Vec<BitField>,
}

impl BitLayout {
    /// Define a bit layout and run its width self-check
    pub fn new(name: impl Into<String>, width: BitWidth, fields: &[(&str, u32)]) -> LayoutResult<Self> {
        let layout = Self {
            name: name.into(),
            width,
            fields: fields
                .iter()
                .map(|(n, bits)| BitField {
                    name: (*n).to_string(),
                    bits: *bits,
                    coercion: None,
                })
                .collect(),
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Attach a coercion hook to a sub-field
    pub fn with_coercion(mut self, field: &str, coercion: Coercion) -> LayoutResult<Self> {
        if !coercion.is_integral() {
            return Err(LayoutError::InvalidDefinition {
                layout: self.name,
                reason: format!("bit field {field} can only be coerced to an enum or flag set"),
            });
        }
        let Some(target) = self.fields.iter_mut().find(|f| f.name == field) else {
            return Err(LayoutError::UnknownField {
                layout: self.name,
                field: field.to_string(),
            });
        };
        target.coercion = Some(coercion);
        Ok(self)
    }

    /// Check that sub-field widths fill the backing integer exactly
    pub fn validate(&self) -> LayoutResult<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.bits == 0 {
                return Err(LayoutError::InvalidDefinition {
                    layout: self.name.clone(),
                    reason: format!("bit field {} has zero width", field.name),
                });
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(LayoutError::InvalidDefinition {
                    layout: self.name.clone(),
                    reason: format!("duplicate bit field {}", field.name),
                });
            }
        }
        let computed: u32 = self.fields.iter().map(|f| f.bits).sum();
        if computed != self.width.bits() {
            return Err(LayoutError::BitWidthCheck {
                layout: self.name.clone(),
                declared: self.width.bits(),
                computed,
            });
        }
        Ok(())
    }

    /// Layout name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing integer width
    pub const fn width(&self) -> BitWidth {
        self.width
    }

    /// Sub-fields in declaration order
    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    /// Position of a sub-field
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Split a raw integer into sub-field values, no coercion applied
    pub fn unpack(&self, raw: u64) -> Vec<u64> {
        let mut shift = self.width.bits();
        self.fields
            .iter()
            .map(|field| {
                shift -= field.bits;
                (raw >> shift) & field.max()
            })
            .collect()
    }

    /// Combine raw sub-field values into one integer
    pub fn pack(&self, values: &[u64]) -> LayoutResult<u64> {
        if values.len() != self.fields.len() {
            return Err(LayoutError::TypeMismatch {
                field: self.name.clone(),
                reason: format!(
                    "expected {} bit field values, got {}",
                    self.fields.len(),
                    values.len()
                ),
            });
        }
        let mut shift = self.width.bits();
        let mut out = 0u64;
        for (field, &value) in self.fields.iter().zip(values) {
            if value > field.max() {
                return Err(LayoutError::Overflow {
                    field: field.name.clone(),
                    value: i128::from(value),
                    max: field.max(),
                });
            }
            shift -= field.bits;
            out |= value << shift;
        }
        Ok(out)
    }

    /// Decode a raw integer into a [`BitRecord`], applying coercion hooks
    pub fn decode(self: &Arc<Self>, raw: u64) -> LayoutResult<BitRecord> {
        let values = self
            .fields
            .iter()
            .zip(self.unpack(raw))
            .map(|(field, value)| match &field.coercion {
                Some(coercion) => coercion.to_domain(&field.name, Value::UInt(value)),
                None => Ok(Value::UInt(value)),
            })
            .collect::<LayoutResult<Vec<_>>>()?;
        Ok(BitRecord {
            layout: Arc::clone(self),
            values,
        })
    }

    /// Encode a [`BitRecord`] back into its raw integer
    pub fn encode(&self, record: &BitRecord) -> LayoutResult<u64> {
        let raw = self
            .fields
            .iter()
            .zip(&record.values)
            .map(|(field, value)| field_raw(field, value))
            .collect::<LayoutResult<Vec<_>>>()?;
        self.pack(&raw)
    }

    /// All-zero value
    pub fn zeroed(self: &Arc<Self>) -> BitRecord {
        let values = self
            .fields
            .iter()
            .map(|field| match &field.coercion {
                Some(coercion) => coercion
                    .to_domain(&field.name, Value::UInt(0))
                    .unwrap_or(Value::UInt(0)),
                None => Value::UInt(0),
            })
            .collect();
        BitRecord {
            layout: Arc::clone(self),
            values,
        }
    }
}

fn field_raw(field: &BitField, value: &Value) -> LayoutResult<u64> {
    let raw = match &field.coercion {
        Some(coercion) => coercion.to_raw(&field.name, value)?,
        None => value.clone(),
    };
    let Some(wide) = raw.as_i128() else {
        return Err(LayoutError::TypeMismatch {
            field: field.name.clone(),
            reason: format!("expected an integer, got {}", raw.kind_name()),
        });
    };
    if wide < 0 || wide > i128::from(field.max()) {
        return Err(LayoutError::Overflow {
            field: field.name.clone(),
            value: wide,
            max: field.max(),
        });
    }
    Ok(wide as u64)
}

/// Decoded values of a [`BitLayout`]
#[derive(Debug, Clone, PartialEq)]
pub struct BitRecord {
    layout: Arc<BitLayout>,
    values: Vec<Value>,
}

impl BitRecord {
    /// Layout this record was decoded with
    pub fn layout(&self) -> &Arc<BitLayout> {
        &self.layout
    }

    /// Sub-field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout.index_of(name).map(|i| &self.values[i])
    }

    /// Sub-field value as a raw integer
    pub fn get_raw(&self, name: &str) -> Option<u64> {
        let index = self.layout.index_of(name)?;
        field_raw(&self.layout.fields[index], &self.values[index]).ok()
    }

    /// Write a sub-field; the value is range-checked immediately
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> LayoutResult<()> {
        let Some(index) = self.layout.index_of(name) else {
            return Err(LayoutError::UnknownField {
                layout: self.layout.name.clone(),
                field: name.to_string(),
            });
        };
        let field = &self.layout.fields[index];
        let value = value.into();
        let raw = field_raw(field, &value)?;
        self.values[index] = match (&field.coercion, &value) {
            // keep raw assignments in their domain form
            (Some(coercion), Value::Int(_) | Value::UInt(_)) => {
                coercion.to_domain(&field.name, Value::UInt(raw))?
            }
            _ => value,
        };
        Ok(())
    }

    /// Pack back into the backing integer
    pub fn raw(&self) -> LayoutResult<u64> {
        self.layout.encode(self)
    }

    /// Iterate `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .fields
            .iter()
            .map(BitField::name)
            .zip(&self.values)
    }
}

impl fmt::Display for BitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.layout.name)?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::layout::coerce::EnumSpec;
    use proptest::prelude::*;

    fn primitive() -> Arc<BitLayout> {
        Arc::new(
            BitLayout::new(
                "Primitive",
                BitWidth::U32,
                &[("unique_contents", 8), ("index", 16), ("type", 8)],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_width_self_check() {
        let result = BitLayout::new("Short", BitWidth::U16, &[("a", 3), ("b", 5)]);
        assert!(matches!(
            result,
            Err(LayoutError::BitWidthCheck {
                declared: 16,
                computed: 8,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_width_rejected() {
        let result = BitLayout::new("Zero", BitWidth::U8, &[("a", 0), ("b", 8)]);
        assert!(matches!(result, Err(LayoutError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_most_significant_first() {
        let layout = primitive();
        let record = layout.decode(0xAA_BBBB_CC).unwrap();
        assert_eq!(record.get_raw("unique_contents"), Some(0xAA));
        assert_eq!(record.get_raw("index"), Some(0xBBBB));
        assert_eq!(record.get_raw("type"), Some(0xCC));
        assert_eq!(record.raw().unwrap(), 0xAA_BBBB_CC);
    }

    #[test]
    fn test_overflow_on_write() {
        let layout = primitive();
        let mut record = layout.zeroed();
        record.set("index", 0xFFFFu32).unwrap();
        let result = record.set("type", 256u32);
        assert!(matches!(
            result,
            Err(LayoutError::Overflow { max: 255, value: 256, .. })
        ));
        let result = record.set("type", -1i32);
        assert!(matches!(result, Err(LayoutError::Overflow { .. })));
        assert_eq!(record.raw().unwrap(), 0x00_FFFF_00);
    }

    #[test]
    fn test_unknown_sub_field() {
        let mut record = primitive().zeroed();
        assert!(matches!(
            record.set("missing", 1u8),
            Err(LayoutError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_coerced_sub_field() {
        let kind = Arc::new(EnumSpec::closed(
            "PrimitiveType",
            &[("BRUSH", 0), ("TRICOLL", 64)],
        ));
        let layout = Arc::new(
            BitLayout::new(
                "Primitive",
                BitWidth::U32,
                &[("unique_contents", 8), ("index", 16), ("type", 8)],
            )
            .unwrap()
            .with_coercion("type", Coercion::Enum(kind))
            .unwrap(),
        );
        let record = layout.decode(0x01_0002_40).unwrap();
        assert_eq!(record.get("type").unwrap().to_string(), "PrimitiveType.TRICOLL");
        assert_eq!(record.raw().unwrap(), 0x01_0002_40);
        assert!(layout.decode(0x01_0002_41).is_err());
    }

    #[test]
    fn test_full_width_field() {
        let layout = Arc::new(BitLayout::new("Whole", BitWidth::U64, &[("all", 64)]).unwrap());
        let record = layout.decode(u64::MAX).unwrap();
        assert_eq!(record.raw().unwrap(), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack(a in 0u64..256, b in 0u64..65536, c in 0u64..256) {
            let layout = primitive();
            let packed = layout.pack(&[a, b, c]).unwrap();
            prop_assert_eq!(layout.unpack(packed), vec![a, b, c]);
            let record = layout.decode(packed).unwrap();
            prop_assert_eq!(layout.encode(&record).unwrap(), packed);
        }

        #[test]
        fn prop_widths_sum(split in 1u32..16) {
            let layout = BitLayout::new("Split", BitWidth::U16, &[("hi", split), ("lo", 16 - split)]).unwrap();
            let total: u32 = layout.fields().iter().map(BitField::bits).sum();
            prop_assert_eq!(total, layout.width().bits());
        }
    }
}
