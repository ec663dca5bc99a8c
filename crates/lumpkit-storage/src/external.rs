//! External lump files
//!
//! Some branches move lumps out of the container into sibling files named
//! `<container file name>.<id as 4-digit lowercase hex>.<suffix>`, e.g.
//! `mp_box.bsp.0003.bsp_lump`. An external file replaces the internal
//! range of its entry.

use crate::LoadError;
use crate::config::LoadOptions;
use crate::source::{ByteSource, Segment};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the external file for entry `id`
pub fn external_segment_path(container: &Path, id: u32, suffix: &str) -> PathBuf {
    let file_name = container
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    container.with_file_name(format!("{file_name}.{id:04x}.{suffix}"))
}

/// Where an entry's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOrigin {
    /// The container's own range
    Internal,
    /// A sibling file
    External(PathBuf),
}

/// Outcome of [`ExternalSegmentResolver::locate`]
#[derive(Debug)]
pub struct Located {
    /// Segment to read
    pub segment: Segment,
    /// Where it comes from
    pub origin: SegmentOrigin,
    /// Set when an external file existed but could not be opened
    pub issue: Option<LoadError>,
}

/// Chooses between the container range and an external file
#[derive(Debug, Clone)]
pub struct ExternalSegmentResolver {
    container: PathBuf,
    suffix: String,
    enabled: bool,
}

impl ExternalSegmentResolver {
    /// Resolver for the container at `container`
    pub fn new(container: impl Into<PathBuf>, options: &LoadOptions) -> Self {
        Self {
            container: container.into(),
            suffix: options.external_suffix.clone(),
            enabled: options.prefer_external,
        }
    }

    /// External file path for `id`
    pub fn path_for(&self, id: u32) -> PathBuf {
        external_segment_path(&self.container, id, &self.suffix)
    }

    /// Whether an external file exists for `id`
    pub fn has_external(&self, id: u32) -> bool {
        self.enabled && self.path_for(id).is_file()
    }

    /// Ids below `count` with an external file
    pub fn discover(&self, count: usize) -> Vec<u32> {
        (0..count as u32).filter(|&id| self.has_external(id)).collect()
    }

    /// Prefer the external file for `id`, else `internal`
    pub fn locate(&self, id: u32, entry: &str, internal: Segment) -> Located {
        let path = self.path_for(id);
        if !self.enabled || !path.exists() {
            return Located {
                segment: internal,
                origin: SegmentOrigin::Internal,
                issue: None,
            };
        }
        match ByteSource::open(&path) {
            Ok(source) => {
                debug!("Using external file {} for {}", path.display(), entry);
                Located {
                    segment: Segment::whole(source),
                    origin: SegmentOrigin::External(path),
                    issue: None,
                }
            }
            Err(e) => {
                warn!(
                    "External file {} for {} unavailable, using internal range: {}",
                    path.display(),
                    entry,
                    e
                );
                Located {
                    segment: internal,
                    origin: SegmentOrigin::Internal,
                    issue: Some(LoadError::ExternalSegmentUnavailable {
                        entry: entry.to_string(),
                        path,
                        source: e,
                    }),
                }
            }
        }
    }
}
