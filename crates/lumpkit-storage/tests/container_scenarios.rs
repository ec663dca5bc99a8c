#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end container tests
//!
//! Each test writes a small container to a temporary directory, opens it
//! through the public API and checks what the resolution pipeline makes of
//! it: typed and raw views, compression, external files, nested game lump
//! directories and rewriting.

use lumpkit_formats::branches::{self, valve_lumps};
use lumpkit_formats::header::{
    ChildLumpHeader, ContainerFormat, ContainerHeader, ContainerVersion, LumpHeader, VersionEncoding,
};
use lumpkit_formats::layout::{FieldLayout, Primitive, Value, Vec3};
use lumpkit_formats::lzma;
use lumpkit_formats::schema::{Branch, SchemaRegistry};
use lumpkit_storage::{Container, LoadError, LoadOptions, LumpElement, SegmentOrigin};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Container bytes assembled slot by slot
struct Builder {
    format: ContainerFormat,
    header: ContainerHeader,
    data: Vec<u8>,
}

impl Builder {
    fn new(branch: &Branch, version: ContainerVersion, revision: Option<u32>) -> Self {
        let header = ContainerHeader::new(&branch.format, version, revision);
        Self {
            format: branch.format.clone(),
            header,
            data: vec![0; branch.format.header_size() as usize],
        }
    }

    fn next_offset(&self) -> u64 {
        (self.data.len() as u64).next_multiple_of(4)
    }

    fn lump_at(mut self, id: u32, offset: u64, version: u32, tag: u32, bytes: &[u8]) -> Self {
        let end = offset as usize + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(bytes);
        self.header.entries[id as usize] = LumpHeader {
            offset: offset as u32,
            length: bytes.len() as u32,
            version,
            compression_tag: tag,
        };
        self
    }

    fn lump(self, id: u32, version: u32, bytes: &[u8]) -> Self {
        let offset = self.next_offset();
        self.lump_at(id, offset, version, 0, bytes)
    }

    fn compressed(self, id: u32, version: u32, plain_len: usize, packed: &[u8]) -> Self {
        let offset = self.next_offset();
        self.lump_at(id, offset, version, plain_len as u32, packed)
    }

    fn write(mut self, path: &Path) {
        let mut header = Cursor::new(Vec::new());
        self.header.write(&mut header, &self.format).unwrap();
        let header = header.into_inner();
        self.data[..header.len()].copy_from_slice(&header);
        std::fs::write(path, &self.data).unwrap();
    }
}

/// Four slot branch with a three-float record at entry 1
fn small_branch() -> Arc<Branch> {
    let point = FieldLayout::builder("Point", 12)
        .scalar("x", Primitive::F32)
        .scalar("y", Primitive::F32)
        .scalar("z", Primitive::F32)
        .build()
        .unwrap();
    let mut registry =
        SchemaRegistry::new().with_names(&[(0, "ENTITIES"), (1, "POINTS"), (2, "INDICES"), (3, "EXTRA")]);
    registry.register(1, 0, &point).unwrap();
    registry
        .register(
            2,
            0,
            &FieldLayout::builder("Index", 2)
                .scalar("value", Primitive::U16)
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(Branch {
        name: "small".to_string(),
        versions: vec![1],
        format: ContainerFormat {
            magic: *b"SMAL",
            version_encoding: VersionEncoding::Single,
            directory_offset: 8,
            entry_count: 4,
            revision_offset: None,
        },
        registry,
        nested: None,
    })
}

fn floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn float_field(element: &LumpElement, name: &str) -> f64 {
    element.as_record().unwrap().get(name).unwrap().as_f64().unwrap()
}

#[test]
fn record_at_offset_100_reads_its_twelve_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bsp");
    let branch = small_branch();
    Builder::new(&branch, ContainerVersion::Single(1), None)
        .lump_at(1, 100, 0, 0, &floats(&[1.5, -2.0, 3.25]))
        .write(&path);

    let container = Container::open(&path, branch, LoadOptions::default()).unwrap();
    let resolution = container.resolve_entry(1).unwrap();
    assert!(resolution.issues.is_empty());
    let lump = resolution.lump;
    assert_eq!(lump.len(), 1);
    assert_eq!(lump.origin(), 100);

    let first = lump.get(0).unwrap();
    assert_eq!(float_field(&first, "x"), 1.5);
    assert_eq!(float_field(&first, "y"), -2.0);
    assert_eq!(float_field(&first, "z"), 3.25);
    assert_eq!(lump.materialize().unwrap(), std::fs::read(&path).unwrap()[100..112]);
}

#[test]
fn length_not_multiple_of_record_falls_back_to_raw() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bsp");
    let branch = small_branch();
    Builder::new(&branch, ContainerVersion::Single(1), None)
        .lump(1, 0, &[7u8; 14])
        .lump(2, 3, &[1, 0, 2, 0])
        .write(&path);

    let container = Container::open(&path, branch, LoadOptions::default()).unwrap();
    let loaded = container.load_all();

    let points = &loaded.lumps[&1];
    assert!(!points.is_typed());
    assert_eq!(points.len(), 14);
    assert_eq!(points.get(13).unwrap(), LumpElement::Byte(7));
    assert!(matches!(
        loaded.errors.get("POINTS"),
        [LoadError::RecordSizeMismatch {
            length: 14,
            record_size: 12,
            ..
        }]
    ));

    // version 3 of INDICES has no layout
    assert!(!loaded.lumps[&2].is_typed());
    assert!(matches!(
        loaded.errors.get("INDICES"),
        [LoadError::UnsupportedVersion { version: 3, .. }]
    ));
    assert_eq!(loaded.errors.fatal().count(), 0);
}

#[test]
fn compressed_entries_decode_or_fail_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bsp");
    let branch = small_branch();
    let plain = floats(&(0..30).map(|i| i as f32).collect::<Vec<_>>());
    let packed = lzma::compress(&plain).unwrap();
    let indices: Vec<u8> = (0..32u16).flat_map(|i| (i * 3).to_le_bytes()).collect();
    let indices_packed = lzma::compress(&indices).unwrap();
    // header plus the first few stream bytes
    let truncated = &indices_packed[..lzma::LzmaHeader::SIZE + 12];
    Builder::new(&branch, ContainerVersion::Single(1), None)
        .lump(0, 0, b"{\"classname\" \"worldspawn\"}\n\0")
        .compressed(1, 0, plain.len(), &packed)
        .compressed(2, 0, indices.len(), truncated)
        .write(&path);

    let container = Container::open(&path, branch, LoadOptions::default()).unwrap();
    let points = container.lump(1).unwrap();
    assert_eq!(points.len(), 10);
    assert_eq!(float_field(&points.get(-1).unwrap(), "z"), 29.0);
    assert_eq!(points.materialize().unwrap(), plain);

    let loaded = container.load_all();
    assert!(loaded.lumps.contains_key(&0));
    assert!(loaded.lumps.contains_key(&1));
    assert!(!loaded.lumps.contains_key(&2));
    assert!(matches!(
        loaded.errors.get("INDICES"),
        [LoadError::DecompressionSizeMismatch { expected: 64, .. }]
    ));
    assert_eq!(loaded.errors.fatal().collect::<Vec<_>>(), vec!["INDICES"]);
}

#[test]
fn external_file_overrides_internal_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bsp");
    let branch = small_branch();
    Builder::new(&branch, ContainerVersion::Single(1), None)
        .lump(1, 0, &floats(&[1.0, 2.0, 3.0]))
        .write(&path);
    std::fs::write(
        dir.path().join("map.bsp.0001.bsp_lump"),
        floats(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]),
    )
    .unwrap();

    let container = Container::open(&path, Arc::clone(&branch), LoadOptions::default()).unwrap();
    assert_eq!(container.external_entries(), vec![1]);
    let resolution = container.resolve_entry(1).unwrap();
    assert!(matches!(resolution.origin, SegmentOrigin::External(_)));
    assert_eq!(resolution.lump.len(), 2);
    assert_eq!(float_field(&resolution.lump.get(1).unwrap(), "x"), 7.0);

    let internal_only = Container::open(
        &path,
        branch,
        LoadOptions::default().with_prefer_external(false),
    )
    .unwrap();
    let resolution = internal_only.resolve_entry(1).unwrap();
    assert_eq!(resolution.origin, SegmentOrigin::Internal);
    assert_eq!(resolution.lump.len(), 1);
}

#[test]
fn save_as_writes_edits_uncompressed_and_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.bsp");
    let branch = small_branch();
    let indices: Vec<u8> = [5u16, 6, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
    let packed = lzma::compress(&indices).unwrap();
    Builder::new(&branch, ContainerVersion::Single(1), None)
        .lump(0, 0, b"ent")
        .lump(1, 0, &floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
        .compressed(2, 0, indices.len(), &packed)
        .write(&path);
    std::fs::write(dir.path().join("map.bsp.0003.bsp_lump"), b"side car").unwrap();

    let container = Container::open(&path, Arc::clone(&branch), LoadOptions::default()).unwrap();
    let mut points = container.lump(1).unwrap();
    let mut moved = points.record(0).unwrap();
    moved.set("x", 10.0f32).unwrap();
    points.set(0, moved.clone()).unwrap();
    points.insert(1, moved).unwrap();
    points.delete(-1).unwrap();
    let expected_points = points.materialize().unwrap();

    let saved = dir.path().join("edited.bsp");
    let edits = BTreeMap::from([(1, points)]);
    container.save_as(&saved, &edits).unwrap();

    let reopened = Container::open(&saved, branch, LoadOptions::default()).unwrap();
    for entry in reopened.directory().entries() {
        assert_eq!(entry.offset % 4, 0, "{} is not aligned", entry.name);
        assert_eq!(entry.compression_tag, 0);
    }
    let points = reopened.lump(1).unwrap();
    assert_eq!(points.materialize().unwrap(), expected_points);
    assert_eq!(float_field(&points.get(1).unwrap(), "x"), 10.0);
    assert_eq!(reopened.lump(2).unwrap().materialize().unwrap(), indices);
    assert_eq!(reopened.lump(0).unwrap().materialize().unwrap(), b"ent");

    // the external lump stays external
    assert_eq!(
        std::fs::read(dir.path().join("edited.bsp.0003.bsp_lump")).unwrap(),
        b"side car"
    );
    assert!(reopened.directory().entry(3).unwrap().is_empty());
    assert_eq!(reopened.lump(3).unwrap().materialize().unwrap(), b"side car");
}

fn detail_lighting(records: u8) -> Vec<u8> {
    (0..records)
        .flat_map(|i| [i, i + 1, i + 2, 0xFE, 1, 0, 0, 0])
        .collect()
}

/// Valve container whose game lump holds `dplt` (modeled), `dplh` at an
/// unknown version and `prps` (unmodeled)
fn write_valve_with_game_lump(path: &Path, branch: &Branch) -> u64 {
    let builder = Builder::new(branch, ContainerVersion::Single(20), Some(7))
        .lump(valve_lumps::EDGES, 0, &[0, 0, 1, 0, 1, 0, 2, 0]);
    let base = builder.next_offset();
    let header_bytes = 4 + 4 * 16;
    let dplt = detail_lighting(2);
    let dplh = detail_lighting(1);
    let prps = b"props";

    let mut headers = Vec::new();
    let mut data = Vec::new();
    for (name, version, bytes) in [("dplt", 0u16, &dplt[..]), ("dplh", 2, &dplh[..]), ("sprp", 0, &prps[..])] {
        headers.push(ChildLumpHeader {
            id: ChildLumpHeader::id_from_name(name, true),
            flags: 0,
            version,
            offset: (base as usize + header_bytes + data.len()) as i32,
            length: Some(bytes.len() as i32),
        });
        data.extend_from_slice(bytes);
    }
    headers.push(ChildLumpHeader::terminator(
        (base as usize + header_bytes + data.len()) as i32,
        true,
    ));
    let format = branch.nested.unwrap();
    let mut game_lump = Cursor::new(Vec::new());
    format.write_headers(&mut game_lump, &headers).unwrap();
    let mut game_lump = game_lump.into_inner();
    game_lump.extend_from_slice(&data);

    builder
        .lump_at(valve_lumps::GAME_LUMP, base, 0, 0, &game_lump)
        .write(path);
    base
}

#[test]
fn valve_game_lump_children() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("valve.bsp");
    let branch = Arc::new(branches::valve_source().unwrap());
    write_valve_with_game_lump(&path, &branch);

    let container = Container::open(&path, Arc::clone(&branch), LoadOptions::default()).unwrap();
    assert_eq!(container.directory().version(), ContainerVersion::Single(20));
    assert_eq!(container.directory().revision(), Some(7));

    let nested = container.open_nested_directory().unwrap();
    assert_eq!(nested.names().collect::<Vec<_>>(), vec!["dplt", "dplh", "sprp"]);
    let dplt = &nested.get("dplt").unwrap().lump;
    assert!(dplt.is_typed());
    assert_eq!(dplt.len(), 2);
    let style = dplt.record(1).unwrap().get_path("lighting.2").cloned();
    assert_eq!(style, Some(Value::UInt(3)));
    assert!(!nested.get("dplh").unwrap().lump.is_typed());
    assert_eq!(nested.get("sprp").unwrap().lump.materialize().unwrap(), b"props");

    let loaded = container.load_all();
    assert!(loaded.nested.is_some());
    assert!(matches!(
        loaded.errors.get("GAME_LUMP.dplh"),
        [LoadError::UnsupportedVersion { version: 2, .. }]
    ));
    assert!(loaded.errors.get("GAME_LUMP.dplt").is_empty());
}

#[test]
fn saving_rebases_absolute_game_lump_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("valve.bsp");
    let branch = Arc::new(branches::valve_source().unwrap());
    let old_base = write_valve_with_game_lump(&path, &branch);

    let container = Container::open(&path, Arc::clone(&branch), LoadOptions::default()).unwrap();
    let mut edges = container.lump(valve_lumps::EDGES).unwrap();
    let mut edge = edges.record(0).unwrap();
    edge.set_path("vertices.1", 9u16).unwrap();
    edges.extend([edge.clone(), edge.clone(), edge]).unwrap();

    let saved = dir.path().join("saved.bsp");
    container
        .save_as(&saved, &BTreeMap::from([(valve_lumps::EDGES, edges)]))
        .unwrap();

    let reopened = Container::open(&saved, branch, LoadOptions::default()).unwrap();
    let new_base = reopened.directory().entry(valve_lumps::GAME_LUMP).unwrap().offset;
    assert_eq!(new_base, old_base + 12);
    assert_eq!(reopened.lump(valve_lumps::EDGES).unwrap().len(), 5);

    let nested = reopened.open_nested_directory().unwrap();
    let dplt = nested.get("dplt").unwrap();
    assert_eq!(dplt.header.offset as u64, new_base + 4 + 4 * 16);
    assert_eq!(dplt.lump.materialize().unwrap(), detail_lighting(2));
    assert_eq!(nested.get("sprp").unwrap().lump.materialize().unwrap(), b"props");
}

#[test]
fn titanfall_split_version_and_detection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mp_box.bsp");
    let builtin = branches::builtin().unwrap();
    let titanfall = Arc::clone(&builtin[1]);
    // unique_contents 3, index 12, type TRICOLL; first field in the high bits
    let primitive = (3u32 << 24) | (12 << 8) | 64;
    let mut geo_set = vec![1, 0, 4, 0];
    geo_set.extend_from_slice(&primitive.to_le_bytes());
    Builder::new(&titanfall, ContainerVersion::Split { major: 29, minor: 1 }, Some(42))
        .lump(0x57, 0, &geo_set)
        .lump(0x03, 0, &floats(&[0.5, 1.5, 2.5]))
        .write(&path);

    let container = Container::open_detect(&path, &builtin, LoadOptions::default()).unwrap();
    assert_eq!(container.branch().name, "titanfall");
    assert_eq!(container.directory().version().to_string(), "29.1");
    assert_eq!(container.directory().revision(), Some(42));

    let geo_sets = container.lump(0x57).unwrap();
    let record = geo_sets.record(0).unwrap();
    let bits = record.bits("primitive").unwrap();
    assert_eq!(bits.get_raw("index"), Some(12));
    assert_eq!(bits.get_raw("unique_contents"), Some(3));
    assert_eq!(bits.get("type").and_then(|v| v.as_i64()), Some(64));

    let vertices = container.lump(0x03).unwrap();
    let position = vertices.record(0).unwrap().get("position").and_then(Value::as_vector);
    assert_eq!(position, Some(Vec3::new(0.5, 1.5, 2.5)));

    let search = geo_sets.search("num_primitives", &Value::Int(4)).unwrap();
    assert_eq!(search, vec![0]);
}
