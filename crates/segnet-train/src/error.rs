//! Error types of the segnet-train crate.
//!
//! Dataset errors cover discovery and decoding of image/label folders; routine
//! errors cover configuration, persistence and the metrics sink.

use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationReport;

/// Error type for folder datasets and transforms.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Error when reading a directory fails.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// Error when the image directory is not found.
    #[error("Image directory not found: {path}")]
    ImageDirectoryNotFound {
        /// The expected image directory path.
        path: PathBuf,
    },

    /// Error when the label directory is not found.
    #[error("Label directory not found: {path}")]
    LabelDirectoryNotFound {
        /// The expected label directory path.
        path: PathBuf,
    },

    /// Error when the second-modality directory is not found.
    #[error("Modality directory not found: {path}")]
    ModalityDirectoryNotFound {
        /// The expected modality directory path.
        path: PathBuf,
    },

    /// Error when no complete image/label pair is found.
    #[error("No valid image/label pairs found in: {path}")]
    NoValidPairs {
        /// The directory where no pairs were found.
        path: PathBuf,
    },

    /// Error when opening or decoding an image file fails.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image processing error.
        #[source]
        source: image::ImageError,
    },

    /// Error when a file has no stem (filename without extension).
    #[error("File has no stem: {path}")]
    NoFileStem {
        /// The file path without a stem.
        path: PathBuf,
    },

    /// Error when the label and the image(s) of one sample differ in size.
    #[error("Size mismatch for {path}: expected {expected:?}, found {actual:?}")]
    SizeMismatch {
        /// The file whose size disagrees with the image.
        path: PathBuf,
        /// `[height, width]` of the image.
        expected: [usize; 2],
        /// `[height, width]` of the offending file.
        actual: [usize; 2],
    },

    /// Error when normalization statistics do not match the channel count.
    #[error("Normalization expects {expected} channels, image has {actual}")]
    ChannelMismatch {
        /// Number of mean/std entries.
        expected: usize,
        /// Number of channels of the decoded image.
        actual: usize,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Error type for the training routine.
#[derive(Error, Debug)]
pub enum RoutineError {
    /// The routine configuration was rejected before any resource was acquired.
    #[error("Invalid routine configuration:\n{0}")]
    InvalidConfiguration(ValidationReport),

    /// Error while preparing a folder dataset.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Error when a loader stops before yielding every item of its dataset.
    #[error("The {split} loader yielded {yielded} of {expected} items")]
    IncompleteEpoch {
        /// `training` or `validation`.
        split: &'static str,
        /// Items seen during the pass.
        yielded: usize,
        /// Items the loader reports.
        expected: usize,
    },

    /// Error when a batch does not carry the channels the model reads.
    #[error("The {split} loader yields {actual} input channels, the model reads {expected}")]
    InputChannels {
        /// `training` or `validation`.
        split: &'static str,
        /// Input channels of the model.
        expected: usize,
        /// Channels of the batch.
        actual: usize,
    },

    /// Error when a model or optimizer record cannot be written or read.
    #[error("Failed to record {path}: {reason}")]
    Record {
        /// The record file.
        path: PathBuf,
        /// Description reported by the recorder.
        reason: String,
    },

    /// Error when a checkpoint or log file cannot be accessed.
    #[error("I/O error on {path}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error when the checkpoint manifest cannot be encoded or decoded.
    #[error("Invalid checkpoint manifest: {path}")]
    Manifest {
        /// The manifest file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// A specialized `Result` type for the training routine.
pub type RoutineResult<T> = Result<T, RoutineError>;
