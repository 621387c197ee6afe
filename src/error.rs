use std::path::PathBuf;

use thiserror::Error;

/// Every failure the pipeline can surface.
///
/// Nothing in this crate retries: an error halts the calling operation
/// (build, batch fetch or save) and is handed back unchanged.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid corpus layout, graph description or option combination.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cache miss. Callers treat this as "recompute" or "keep random init".
    #[error("cache entry '{key}' not found")]
    NotFound { key: String },

    /// An array entry was read as a blob, or the other way round.
    #[error("cache entry '{key}' holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to decode '{path}': {message}")]
    Decode { path: PathBuf, message: String },

    #[error("batch {index} out of range (corpus has {num_batches} batches)")]
    BatchOutOfRange { index: usize, num_batches: usize },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("i/o error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    /// Failure reported by the external numeric engine.
    #[error("numeric engine error: {0}")]
    Engine(String),

    /// A background thread went away without delivering its result.
    #[error("background worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    /// True for a plain cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
