//! Layout error types

use thiserror::Error;

/// Errors raised while defining, decoding or encoding record layouts
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Input length does not match the layout's declared record size
    #[error("{layout}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Layout name
        layout: String,
        /// Declared record size
        expected: usize,
        /// Length of the provided buffer
        actual: usize,
    },

    /// Raw value has no variant in a closed enum
    #[error("field {field}: {value} is not a variant of {enumeration}")]
    UnknownVariant {
        /// Field name
        field: String,
        /// Enum name
        enumeration: String,
        /// Raw value that failed to map
        value: i64,
    },

    /// Value cannot be represented by the field's declared type
    #[error("field {field}: {reason}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Human readable cause
        reason: String,
    },

    /// Bit field write exceeds the sub-field's width
    #[error("bit field {field}: {value} exceeds maximum {max}")]
    Overflow {
        /// Sub-field name
        field: String,
        /// Rejected value
        value: i128,
        /// Largest value the sub-field can hold
        max: u64,
    },

    /// Sum of field sizes differs from the declared record size
    #[error("layout {layout}: declared size {declared} but fields sum to {computed}")]
    LayoutSizeCheck {
        /// Layout name
        layout: String,
        /// Declared record size
        declared: usize,
        /// Sum of field sizes
        computed: usize,
    },

    /// Sum of bit widths differs from the backing integer width
    #[error("bit layout {layout}: backing integer has {declared} bits but fields sum to {computed}")]
    BitWidthCheck {
        /// Bit layout name
        layout: String,
        /// Width of the backing integer
        declared: u32,
        /// Sum of sub-field widths
        computed: u32,
    },

    /// Field name not present in the layout
    #[error("layout {layout} has no field {field:?}")]
    UnknownField {
        /// Layout name
        layout: String,
        /// Requested field name or path
        field: String,
    },

    /// Layout definition is malformed (duplicate names, zero widths, bad hooks)
    #[error("layout {layout}: {reason}")]
    InvalidDefinition {
        /// Layout name
        layout: String,
        /// Description of the problem
        reason: String,
    },

    /// I/O error while reading or writing a record buffer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for layout operations
pub type LayoutResult<T> = Result<T, LayoutError>;
