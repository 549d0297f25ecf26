//! Error types for accessatlas.
//!
//! Grouped by origin: expected failures (bad input, missing files),
//! environment failures (IO, image decode, checkpoints), and internal
//! invariant violations (bugs).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for accessatlas.
#[derive(Debug, Error)]
pub enum AtlasError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected failures — bad input or configuration
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown tag type: {0}")]
    UnknownTagType(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Environment failures — filesystem, image files, checkpoints
    // ═══════════════════════════════════════════════════════════════════
    #[error("Failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    #[error("Checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("Failed to read checkpoint weights: {0}")]
    Recorder(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal — invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtlasError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a CSV error tagged with the file it came from.
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    /// Create an image error tagged with the file it came from.
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for accessatlas.
pub type Result<T> = std::result::Result<T, AtlasError>;
