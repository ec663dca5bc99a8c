//! Declarative record layouts
//!
//! Lump contents are arrays of fixed-size records. A [`FieldLayout`] names
//! every field of such a record and decodes it into a [`Record`]; a
//! [`BitLayout`] does the same for the sub-fields packed into one integer.
//! Coercion hooks turn raw integers and float triples into [`EnumValue`],
//! [`FlagSet`] and [`Vec3`] values and back.
//!
//! # Example
//!
//! ```
//! use lumpkit_formats::layout::{FieldLayout, Primitive, Value};
//!
//! let edge = FieldLayout::builder("Edge", 4)
//!     .array("vertices", Primitive::U16, 2)
//!     .build()?;
//! let record = edge.decode(&[1, 0, 2, 0])?;
//! assert_eq!(record.get_path("vertices.1"), Some(&Value::UInt(2)));
//! assert_eq!(record.to_bytes()?, vec![1, 0, 2, 0]);
//! # Ok::<(), lumpkit_formats::layout::LayoutError>(())
//! ```

mod bitfield;
mod coerce;
mod error;
mod field;
mod record;

pub use bitfield::{BitField, BitLayout, BitRecord, BitWidth};
pub use coerce::{Coerce, Coercion, EnumSpec, EnumValue, FlagSet, FlagSpec, Vec3, Vec3Coercion};
pub use error::{LayoutError, LayoutResult};
pub use field::{FieldDef, FieldKind, FieldLayout, FieldLayoutBuilder, Primitive};
pub use record::{Record, Value};
