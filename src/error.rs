//! Error taxonomy for particle containers, containment search and halo lookup.

use thiserror::Error;

/// Errors raised by containers, indices, the containment resolver and catalogs.
#[derive(Error, Debug)]
pub enum HaloError {
    /// Invalid construction arguments (empty file set, mixed parent datasets, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An index-backed operation was invoked on a container that is not in spatial mode.
    #[error("Container is not spatially indexed: cannot call `{operation}`")]
    NotIndexed { operation: String },

    /// The operation is not part of the index-backed operation set.
    #[error("Unsupported operation: `{operation}`")]
    UnsupportedOperation { operation: String },

    /// Invalid ghost zone depth, or widening requested before the index was built.
    #[error("Ghost zone error: {0}")]
    GhostZone(String),

    /// Geometric growth reached its bound without enclosing every member.
    #[error(
        "No enclosing sphere found up to {multiplier:.1}x the approximate radius ({missing} members still missing)"
    )]
    ContainmentNotFound { multiplier: f64, missing: usize },

    /// The requested identifier is not in the catalog.
    #[error("Halo {identifier} not found in catalog")]
    HaloNotFound { identifier: i64 },

    /// The requested field does not exist for this particle type.
    #[error("Unknown field ({ptype}, {field})")]
    UnknownField { ptype: String, field: String },

    /// IO error while reading a snapshot or catalog.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON snapshot or catalog.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HaloError {
    pub(crate) fn not_indexed(operation: &str) -> Self {
        HaloError::NotIndexed {
            operation: operation.to_string(),
        }
    }
}

/// Result type for container, index and catalog operations.
pub type Result<T> = std::result::Result<T, HaloError>;
