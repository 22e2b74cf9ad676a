use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading pretrained weights.
#[derive(Debug, Error)]
pub enum WeightError {
    /// The weight file does not exist.
    #[error("weight file not found: {path}")]
    NotFound { path: PathBuf },

    /// The recorder could not turn the file into a record.
    #[error("failed to load weights from {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// Result type for weight loading.
pub type WeightResult<T> = Result<T, WeightError>;
