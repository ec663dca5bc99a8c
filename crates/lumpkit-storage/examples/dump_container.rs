#![allow(clippy::expect_used, clippy::panic)]

//! Dump the directory of a map container and what each entry resolves to.
//!
//! Usage:
//!   cargo run --example dump_container -p lumpkit-storage -- maps/mp_box.bsp

use lumpkit_formats::branches;
use lumpkit_storage::{Container, LoadOptions};

fn main() {
    let path = std::env::args()
        .nth(1)
        .expect("usage: dump_container <container>");
    let builtin = branches::builtin().expect("bundled branch tables are valid");
    let container =
        Container::open_detect(&path, &builtin, LoadOptions::default()).expect("failed to open container");

    let directory = container.directory();
    println!(
        "{} ({} v{}, revision {:?}, {} bytes)\n",
        directory.path().display(),
        container.branch().name,
        directory.version(),
        directory.revision(),
        directory.file_size()
    );

    let loaded = container.load_all();
    for entry in directory.entries() {
        let Some(lump) = loaded.lumps.get(&entry.id) else {
            continue;
        };
        let kind = lump
            .layout()
            .map_or_else(|| "raw".to_string(), |layout| layout.name().to_string());
        let preview = lump.materialize().map(|bytes| hex::encode(&bytes[..bytes.len().min(16)]));
        println!(
            "  {:04x} {:<24} v{:<3} offset={:>10} length={:>9} tag={:>9} {:>7} x {:<20} {}",
            entry.id,
            entry.name,
            entry.version,
            entry.offset,
            entry.length,
            entry.compression_tag,
            lump.len(),
            kind,
            preview.unwrap_or_default()
        );
    }

    if let Some(nested) = &loaded.nested {
        println!("\n{} children:", nested.entry());
        for child in nested.children() {
            println!(
                "  {} v{} compressed={} {} elements",
                child.name,
                child.header.version,
                child.compressed,
                child.lump.len()
            );
        }
    }

    if !loaded.errors.is_empty() {
        println!("\nProblems:\n{}", loaded.errors);
    }
}
