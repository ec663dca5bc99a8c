//! Sample branch tables
//!
//! Two small branches that cover every feature of the layout engine: Valve
//! Source (`VBSP` 19 to 21) and Respawn Titanfall (`rBSP` 29). Only a
//! handful of lumps are modeled; everything else loads as raw bytes.

use crate::header::{ContainerFormat, NestedFormat, OffsetBase, VersionEncoding};
use crate::layout::{
    BitLayout, BitWidth, Coercion, EnumSpec, FieldLayout, FlagSpec, Primitive,
};
use crate::schema::{Branch, SchemaRegistry, SchemaResult};
use std::sync::Arc;

/// Valve Source lump ids
pub mod valve_lumps {
    /// Entity key-value text
    pub const ENTITIES: u32 = 0;
    /// Planes
    pub const PLANES: u32 = 1;
    /// Texture data
    pub const TEXTURE_DATA: u32 = 2;
    /// Vertices
    pub const VERTICES: u32 = 3;
    /// Edges
    pub const EDGES: u32 = 12;
    /// Brushes
    pub const BRUSHES: u32 = 18;
    /// Brush sides
    pub const BRUSH_SIDES: u32 = 19;
    /// Nested game lump directory
    pub const GAME_LUMP: u32 = 35;
    /// Embedded zip archive
    pub const PAKFILE: u32 = 40;
}

/// Respawn Titanfall lump ids
pub mod titanfall_lumps {
    /// Entity key-value text
    pub const ENTITIES: u32 = 0x0000;
    /// Planes
    pub const PLANES: u32 = 0x0001;
    /// Texture data
    pub const TEXTURE_DATA: u32 = 0x0002;
    /// Vertices
    pub const VERTICES: u32 = 0x0003;
    /// Nested game lump directory
    pub const GAME_LUMP: u32 = 0x0023;
    /// Collision grid
    pub const CM_GRID: u32 = 0x0055;
    /// Collision geometry sets
    pub const CM_GEO_SETS: u32 = 0x0057;
    /// Collision primitives
    pub const CM_PRIMITIVES: u32 = 0x0059;
}

const VALVE_NAMES: &[(u32, &str)] = &[
    (0, "ENTITIES"),
    (1, "PLANES"),
    (2, "TEXTURE_DATA"),
    (3, "VERTICES"),
    (4, "VISIBILITY"),
    (5, "NODES"),
    (6, "TEXTURE_INFO"),
    (7, "FACES"),
    (8, "LIGHTING"),
    (10, "LEAVES"),
    (12, "EDGES"),
    (13, "SURFEDGES"),
    (14, "MODELS"),
    (18, "BRUSHES"),
    (19, "BRUSH_SIDES"),
    (35, "GAME_LUMP"),
    (40, "PAKFILE"),
    (43, "TEXTURE_DATA_STRING_DATA"),
    (44, "TEXTURE_DATA_STRING_TABLE"),
];

const TITANFALL_NAMES: &[(u32, &str)] = &[
    (0x0000, "ENTITIES"),
    (0x0001, "PLANES"),
    (0x0002, "TEXTURE_DATA"),
    (0x0003, "VERTICES"),
    (0x0023, "GAME_LUMP"),
    (0x0055, "CM_GRID"),
    (0x0057, "CM_GEO_SETS"),
    (0x0059, "CM_PRIMITIVES"),
];

fn contents() -> Arc<FlagSpec> {
    Arc::new(FlagSpec::new(
        "Contents",
        &[
            ("SOLID", 0x01),
            ("WINDOW", 0x02),
            ("GRATE", 0x08),
            ("SLIME", 0x10),
            ("WATER", 0x20),
            ("PLAYER_CLIP", 0x10000),
            ("MONSTER_CLIP", 0x20000),
            ("DETAIL", 0x8000000),
            ("LADDER", 0x20000000),
        ],
    ))
}

fn vertex() -> SchemaResult<Arc<FieldLayout>> {
    Ok(FieldLayout::builder("Vertex", 12)
        .array("position", Primitive::F32, 3)
        .coerce("position", Coercion::Vec3)
        .build()?)
}

fn texture_data() -> SchemaResult<Arc<FieldLayout>> {
    let rgb = FieldLayout::builder("Colour", 12)
        .scalar("r", Primitive::F32)
        .scalar("g", Primitive::F32)
        .scalar("b", Primitive::F32)
        .build()?;
    let size = FieldLayout::builder("Size", 8)
        .scalar("width", Primitive::I32)
        .scalar("height", Primitive::I32)
        .build()?;
    Ok(FieldLayout::builder("TextureData", 32)
        .nested("reflectivity", &rgb)
        .scalar("name_index", Primitive::I32)
        .nested("size", &size)
        .nested("view", &size)
        .build()?)
}

/// Valve Source, `VBSP` versions 19 to 21
pub fn valve_source() -> SchemaResult<Branch> {
    use valve_lumps as lump;

    let plane_type = Arc::new(EnumSpec::open(
        "PlaneType",
        &[("X", 0), ("Y", 1), ("Z", 2), ("ANY_X", 3), ("ANY_Y", 4), ("ANY_Z", 5)],
    ));
    let plane = FieldLayout::builder("Plane", 20)
        .array("normal", Primitive::F32, 3)
        .scalar("distance", Primitive::F32)
        .scalar("type", Primitive::I32)
        .coerce("normal", Coercion::Vec3)
        .coerce("type", Coercion::Enum(plane_type))
        .build()?;
    let edge = FieldLayout::builder("Edge", 4)
        .array("vertices", Primitive::U16, 2)
        .build()?;
    let brush = FieldLayout::builder("Brush", 12)
        .scalar("first_side", Primitive::I32)
        .scalar("num_sides", Primitive::I32)
        .scalar("contents", Primitive::U32)
        .coerce("contents", Coercion::Flags(contents()))
        .build()?;
    let brush_side = FieldLayout::builder("BrushSide", 8)
        .scalar("plane", Primitive::U16)
        .scalar("texture_info", Primitive::I16)
        .scalar("displacement_info", Primitive::I16)
        .scalar("bevel", Primitive::I16)
        .build()?;
    let detail_prop_lighting = FieldLayout::builder("DetailPropLighting", 8)
        .array("lighting", Primitive::U8, 3)
        .scalar("exponent", Primitive::I8)
        .scalar("style", Primitive::U8)
        .bytes("padding", 3)
        .build()?;

    let mut registry = SchemaRegistry::new().with_names(VALVE_NAMES);
    registry.register(lump::PLANES, 0, &plane)?;
    registry.register(lump::TEXTURE_DATA, 0, &texture_data()?)?;
    registry.register(lump::VERTICES, 0, &vertex()?)?;
    registry.register(lump::EDGES, 0, &edge)?;
    registry.register(lump::BRUSHES, 0, &brush)?;
    registry.register(lump::BRUSH_SIDES, 0, &brush_side)?;
    registry.register_child("dplt", 0, &detail_prop_lighting)?;
    registry.register_child("dplh", 0, &detail_prop_lighting)?;

    Ok(Branch {
        name: "valve_source".to_string(),
        versions: vec![19, 20, 21],
        format: ContainerFormat {
            magic: *b"VBSP",
            version_encoding: VersionEncoding::Single,
            directory_offset: 8,
            entry_count: 64,
            revision_offset: Some(8 + 64 * 16),
        },
        registry,
        nested: Some(NestedFormat {
            entry_id: lump::GAME_LUMP,
            with_length: true,
            offset_base: OffsetBase::FileAbsolute,
            reverse_ids: true,
            extra_word: false,
        }),
    })
}

/// Dark Messiah of Might and Magic single player
///
/// Valve Source tables with an extra word in the game lump directory. It
/// shares `VBSP` 20 with [`valve_source`], so it is not part of [`builtin`]
/// and must be chosen explicitly.
pub fn dark_messiah_sp() -> SchemaResult<Branch> {
    let mut branch = valve_source()?;
    branch.name = "dark_messiah_sp".to_string();
    branch.versions = vec![20];
    if let Some(nested) = &mut branch.nested {
        nested.extra_word = true;
    }
    Ok(branch)
}

/// Respawn Titanfall, `rBSP` version 29
pub fn titanfall() -> SchemaResult<Branch> {
    use titanfall_lumps as lump;

    let plane = FieldLayout::builder("Plane", 16)
        .array("normal", Primitive::F32, 3)
        .scalar("distance", Primitive::F32)
        .coerce("normal", Coercion::Vec3)
        .build()?;
    let primitive_type = Arc::new(EnumSpec::closed("PrimitiveType", &[("BRUSH", 0), ("TRICOLL", 64)]));
    let primitive = Arc::new(
        BitLayout::new(
            "Primitive",
            BitWidth::U32,
            &[("unique_contents", 8), ("index", 16), ("type", 8)],
        )?
        .with_coercion("type", Coercion::Enum(Arc::clone(&primitive_type)))?,
    );
    let geo_set = FieldLayout::builder("GeoSet", 8)
        .scalar("straddle_group", Primitive::U16)
        .scalar("num_primitives", Primitive::U16)
        .bits("primitive", &primitive)
        .build()?;
    let cm_primitive = FieldLayout::builder("CMPrimitive", 4)
        .bits("primitive", &primitive)
        .build()?;
    let grid = FieldLayout::builder("Grid", 28)
        .scalar("scale", Primitive::F32)
        .array("offset", Primitive::I32, 2)
        .array("count", Primitive::I32, 2)
        .scalar("num_straddle_groups", Primitive::I32)
        .scalar("base_plane_offset", Primitive::I32)
        .build()?;

    let mut registry = SchemaRegistry::new().with_names(TITANFALL_NAMES);
    registry.register(lump::PLANES, 1, &plane)?;
    registry.register(lump::TEXTURE_DATA, 1, &texture_data()?)?;
    registry.register(lump::VERTICES, 0, &vertex()?)?;
    registry.register(lump::CM_GRID, 0, &grid)?;
    registry.register(lump::CM_GEO_SETS, 0, &geo_set)?;
    registry.register(lump::CM_PRIMITIVES, 0, &cm_primitive)?;

    Ok(Branch {
        name: "titanfall".to_string(),
        versions: vec![29],
        format: ContainerFormat {
            magic: *b"rBSP",
            version_encoding: VersionEncoding::Split,
            directory_offset: 16,
            entry_count: 128,
            revision_offset: Some(8),
        },
        registry,
        nested: Some(NestedFormat {
            entry_id: lump::GAME_LUMP,
            with_length: true,
            offset_base: OffsetBase::LumpRelative,
            reverse_ids: true,
            extra_word: false,
        }),
    })
}

/// Every bundled branch
pub fn builtin() -> SchemaResult<Vec<Arc<Branch>>> {
    Ok(vec![Arc::new(valve_source()?), Arc::new(titanfall()?)])
}

/// Pick the branch claiming a magic and major version
pub fn detect<'a>(branches: &'a [Arc<Branch>], magic: &[u8; 4], major_version: u32) -> Option<&'a Arc<Branch>> {
    branches
        .iter()
        .find(|b| b.format.magic == *magic && b.supports(major_version))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::Dispatch;

    #[test]
    fn test_builtin_tables_validate() {
        let branches = builtin().unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].format.header_size(), 1036);
        assert_eq!(branches[1].format.header_size(), 2064);
    }

    #[test]
    fn test_detect() {
        let branches = builtin().unwrap();
        assert_eq!(detect(&branches, b"VBSP", 20).unwrap().name, "valve_source");
        assert_eq!(detect(&branches, b"rBSP", 29).unwrap().name, "titanfall");
        assert!(detect(&branches, b"rBSP", 47).is_none());
        assert!(detect(&branches, b"IBSP", 38).is_none());
    }

    #[test]
    fn test_dark_messiah_game_lump_prefix() {
        let branch = dark_messiah_sp().unwrap();
        let nested = branch.nested.unwrap();
        assert!(nested.extra_word);
        assert_eq!(nested.prefix_size(), 8);
        assert_eq!(branch.format, valve_source().unwrap().format);
        assert!(!builtin().unwrap().iter().any(|b| b.name == branch.name));
    }

    #[test]
    fn test_geo_set_primitive() {
        let branch = titanfall().unwrap();
        let Dispatch::Layout(layout) = branch.registry.dispatch(titanfall_lumps::CM_GEO_SETS, 0) else {
            unreachable!("GeoSet layout is registered");
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0x05_0010_40u32.to_le_bytes());
        let record = layout.decode(&bytes).unwrap();
        assert_eq!(
            record.get_path("primitive.type").unwrap().to_string(),
            "PrimitiveType.TRICOLL"
        );
        assert_eq!(record.bits("primitive").unwrap().get_raw("index"), Some(0x10));
        assert_eq!(record.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_brush_contents() {
        let branch = valve_source().unwrap();
        let Dispatch::Layout(layout) = branch.registry.dispatch(valve_lumps::BRUSHES, 0) else {
            unreachable!("Brush layout is registered");
        };
        let mut bytes = Vec::new();
        for v in [10i32, 6, 0x21] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let record = layout.decode(&bytes).unwrap();
        assert_eq!(record.get("contents").unwrap().to_string(), "Contents(SOLID|WATER)");
    }
}
