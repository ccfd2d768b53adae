// shelfdb-core/src/error.rs
// Error taxonomy shared by every core module

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfError {
    /// Malformed predicate, projection or update specification
    #[error("Validation error: {0}")]
    Validation(String),

    /// A document in a batch insert was rejected
    #[error("Invalid document at index {index}: {reason}")]
    InvalidDocument { index: usize, reason: String },

    /// Malformed aggregation stage (zero-based stage index)
    #[error("Pipeline stage {stage}: {reason}")]
    Configuration { stage: usize, reason: String },

    /// Raised only where the caller explicitly requires a match
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ShelfError {
    /// Attach a stage index to an error raised while compiling one stage
    pub(crate) fn at_stage(self, stage: usize) -> Self {
        match self {
            ShelfError::Configuration { reason, .. } => ShelfError::Configuration { stage, reason },
            other => ShelfError::Configuration {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ShelfError>;
