//! Training for SegNet-Burn networks.
//!
//! - `routine`: the validated builder, the epoch loop and the evaluation pass.
//! - `dataset` / `transform`: image/label folders as a Burn dataset and batcher.
//! - `loss`: pixel-wise cross-entropy with class weights and an ignored label.
//! - `checkpoint` / `log`: best-epoch checkpoints and the per-epoch metrics file.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod log;
pub mod loss;
pub mod routine;
pub mod transform;
pub mod validation;

pub use checkpoint::{CheckpointManifest, FileCheckpointer};
pub use config::RoutineConfig;
pub use dataset::{
    FolderConfig, SegmentationBatch, SegmentationBatcher, SegmentationFolder, SegmentationItem,
};
pub use error::{DatasetError, DatasetResult, RoutineError, RoutineResult};
pub use log::MetricsLog;
pub use loss::{LossConfig, PixelCrossEntropy};
pub use routine::{
    evaluate, DataSource, EpochSummary, Routine, RoutineBuilder, SegmentationLoader, TrainingReport,
};
pub use transform::{ImageTransform, LabelTransform, TransformConfig};
pub use validation::ValidationReport;
