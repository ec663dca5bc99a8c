//! Per-branch schema lookup
//!
//! Each engine branch maps `(lump id, lump version)` to a [`FieldLayout`].
//! Game lump children use the same scheme keyed by child name. Nothing here
//! is global: a [`Branch`] is built at startup and passed to the loader.

use crate::header::{ContainerFormat, NestedFormat};
use crate::layout::{FieldLayout, LayoutError};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while registering layouts
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Layout failed its self-check
    #[error("layout rejected: {0}")]
    Layout(#[from] LayoutError),

    /// A different layout is already registered for this key
    #[error("{entry} version {version} already has layout {existing}")]
    DuplicateVersion {
        /// Entry name
        entry: String,
        /// Entry version
        version: u32,
        /// Name of the registered layout
        existing: String,
    },
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Outcome of a schema lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Decode with this layout
    Layout(Arc<FieldLayout>),
    /// Entry has no record layout in this branch, read it as raw bytes
    Unmodeled,
    /// Entry is modeled, but not at this version
    UnknownVersion {
        /// Versions that do have a layout
        known: Vec<u32>,
    },
}

/// Two-level `id -> version -> layout` table
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    names: BTreeMap<u32, String>,
    lumps: BTreeMap<u32, BTreeMap<u32, Arc<FieldLayout>>>,
    children: BTreeMap<String, BTreeMap<u32, Arc<FieldLayout>>>,
}

impl SchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Give lump ids readable names
    pub fn with_names(mut self, names: &[(u32, &str)]) -> Self {
        for (id, name) in names {
            self.names.insert(*id, (*name).to_string());
        }
        self
    }

    /// Name of a lump id, `UNKNOWN_<id>` when unnamed
    pub fn entry_name(&self, id: u32) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("UNKNOWN_{id}"))
    }

    /// Lump id for a name
    pub fn entry_id(&self, name: &str) -> Option<u32> {
        self.names.iter().find(|(_, n)| *n == name).map(|(id, _)| *id)
    }

    /// Register a lump layout, running its self-check again
    pub fn register(&mut self, id: u32, version: u32, layout: &Arc<FieldLayout>) -> SchemaResult<()> {
        layout.validate()?;
        let entry = self.entry_name(id);
        insert_layout(self.lumps.entry(id).or_default(), entry, version, layout)
    }

    /// Register a game lump child layout
    pub fn register_child(&mut self, name: &str, version: u32, layout: &Arc<FieldLayout>) -> SchemaResult<()> {
        layout.validate()?;
        insert_layout(
            self.children.entry(name.to_string()).or_default(),
            name.to_string(),
            version,
            layout,
        )
    }

    /// Look up the layout for a lump
    pub fn dispatch(&self, id: u32, version: u32) -> Dispatch {
        lookup(self.lumps.get(&id), version)
    }

    /// Look up the layout for a game lump child
    pub fn dispatch_child(&self, name: &str, version: u32) -> Dispatch {
        lookup(self.children.get(name), version)
    }

    /// Versions registered for a lump
    pub fn versions(&self, id: u32) -> Vec<u32> {
        self.lumps
            .get(&id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Lump ids with at least one layout
    pub fn modeled_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.lumps.keys().copied()
    }
}

fn insert_layout(
    versions: &mut BTreeMap<u32, Arc<FieldLayout>>,
    entry: String,
    version: u32,
    layout: &Arc<FieldLayout>,
) -> SchemaResult<()> {
    if let Some(existing) = versions.get(&version) {
        if Arc::ptr_eq(existing, layout) || **existing == **layout {
            return Ok(());
        }
        return Err(SchemaError::DuplicateVersion {
            entry,
            version,
            existing: existing.name().to_string(),
        });
    }
    versions.insert(version, Arc::clone(layout));
    Ok(())
}

fn lookup(versions: Option<&BTreeMap<u32, Arc<FieldLayout>>>, version: u32) -> Dispatch {
    match versions {
        None => Dispatch::Unmodeled,
        Some(versions) => match versions.get(&version) {
            Some(layout) => Dispatch::Layout(Arc::clone(layout)),
            None => Dispatch::UnknownVersion {
                known: versions.keys().copied().collect(),
            },
        },
    }
}

/// One engine or game variant
#[derive(Debug, Clone)]
pub struct Branch {
    /// Branch name, e.g. `"valve_source"`
    pub name: String,
    /// Container versions this branch reads
    pub versions: Vec<u32>,
    /// Container header layout
    pub format: ContainerFormat,
    /// Lump and child layouts
    pub registry: SchemaRegistry,
    /// Game lump directory layout, if the branch has one
    pub nested: Option<NestedFormat>,
}

impl Branch {
    /// Whether this branch claims a container version
    pub fn supports(&self, major_version: u32) -> bool {
        self.versions.is_empty() || self.versions.contains(&major_version)
    }

    /// Name of a lump id
    pub fn entry_name(&self, id: u32) -> String {
        self.registry.entry_name(id)
    }
}
