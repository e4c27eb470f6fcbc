use std::path::PathBuf;

use thiserror::Error;

/// Result alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Cannot build an index from zero embedding records")]
    EmptyInput,

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Corrupt embedding store: {0}")]
    CorruptStore(String),

    #[error("Corrupt vector index: {0}")]
    CorruptIndex(String),

    #[error("Metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Food CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl RetrievalError {
    /// Wraps an IO error, promoting `NotFound` to its own variant.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            RetrievalError::NotFound(path)
        } else {
            RetrievalError::Io { path, source }
        }
    }

    /// True when the failure means retrieval itself is down (missing or
    /// corrupt artifacts, store failures) rather than a caller mistake.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RetrievalError::Io { .. }
                | RetrievalError::NotFound(_)
                | RetrievalError::CorruptStore(_)
                | RetrievalError::CorruptIndex(_)
                | RetrievalError::Metadata(_)
                | RetrievalError::Encoding(_)
        )
    }
}
