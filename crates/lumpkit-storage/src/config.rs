//! Configuration for container loading

use lumpkit_formats::lzma::MAX_DECOMPRESSION_SIZE;
use serde::{Deserialize, Serialize};

/// Default suffix of external lump files
pub const DEFAULT_EXTERNAL_SUFFIX: &str = "bsp_lump";

/// Options controlling how entries are resolved and decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Abort slice reads on the first record decode error
    pub strict: bool,

    /// Suffix of external lump files, `<container>.<id:04x>.<suffix>`
    pub external_suffix: String,

    /// Read external lump files when present
    pub prefer_external: bool,

    /// Largest decompressed lump accepted (in bytes)
    pub max_decompressed_size: usize,

    /// Decode every record during `load_all` and log the failures
    pub validate_records: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strict: false,
            external_suffix: DEFAULT_EXTERNAL_SUFFIX.to_string(),
            prefer_external: true,
            max_decompressed_size: MAX_DECOMPRESSION_SIZE,
            validate_records: false,
        }
    }
}

impl LoadOptions {
    /// Parse options from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize options to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Enable or disable strict slice reads
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the external lump suffix
    #[must_use]
    pub fn with_external_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.external_suffix = suffix.into();
        self
    }

    /// Enable or disable external lump files
    #[must_use]
    pub const fn with_prefer_external(mut self, prefer: bool) -> Self {
        self.prefer_external = prefer;
        self
    }

    /// Enable or disable the record scan in `load_all`
    #[must_use]
    pub const fn with_validate_records(mut self, validate: bool) -> Self {
        self.validate_records = validate;
        self
    }

    /// Set the decompression limit
    #[must_use]
    pub const fn with_max_decompressed_size(mut self, size: usize) -> Self {
        self.max_decompressed_size = size;
        self
    }
}
