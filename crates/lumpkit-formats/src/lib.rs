//! Record layouts and on-disk structures for BSP map containers
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_sign_loss)] // Range-checked before casting
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::cast_precision_loss)] // Integer views of float fields
#![allow(clippy::doc_markdown)] // Many BSP terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::float_cmp)] // Binary format requirements
#![allow(clippy::derive_partial_eq_without_eq)] // Float-carrying values
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
//! This crate holds everything about a map container that can be described
//! without touching a file: the declarative record layouts lumps decode
//! into, the per-branch schema registry that picks a layout for each
//! `(lump id, version)` pair, the fixed binary headers of the container and
//! of nested game-lump directories, and the proprietary LZMA payload codec.
//!
//! # Modules
//!
//! - **layout**: [`FieldLayout`](layout::FieldLayout), [`BitLayout`](layout::BitLayout),
//!   coercion hooks and decoded [`Record`](layout::Record)s
//! - **schema**: [`SchemaRegistry`](schema::SchemaRegistry) and [`Branch`](schema::Branch)
//! - **header**: directory slots, game lump headers, container formats
//! - **lzma**: the `"LZMA"` payload header used by compressed lumps
//! - **branches**: sample tables for Valve Source and Respawn Titanfall
//!
//! The file-backed side (lazy lumps, external segments, containers) lives in
//! `lumpkit-storage`.

#![warn(missing_docs)]

pub mod branches;
pub mod header;
pub mod layout;
pub mod lzma;
pub mod schema;

pub use header::{ChildLumpHeader, ContainerFormat, LumpHeader, NestedFormat, OffsetBase, VersionEncoding};
pub use layout::{FieldLayout, Record, Value};
pub use schema::{Branch, Dispatch, SchemaRegistry};
