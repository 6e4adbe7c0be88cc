// ⚠️ Error Types - Hard failures of the heuristics engine
// Expected outcomes (no match, empty attribute) are data, never errors

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BidsmapError>;

#[derive(Debug, Error)]
pub enum BidsmapError {
    /// A template was requested for a category name that is not declared
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    /// The map could not be written and read back, even after one retry
    #[error("Could not persist bidsmap to {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// The map document could not be read or parsed
    #[error("Could not load bidsmap from {path}: {message}")]
    Load { path: PathBuf, message: String },

    /// A name collides with an existing file but carries no numeric run entity
    #[error("Cannot increment run index of {0}: no numeric run entity")]
    MissingRunIndex(String),

    #[error("Invalid ignore pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
