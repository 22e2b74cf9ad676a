//! # SegNet Metrics
//!
//! Scores for pixel-wise classification, all derived from an `n x n` confusion
//! matrix whose rows are ground-truth classes and whose columns are predictions.
//!
//! ## Implemented Scores
//!
//! - Overall pixel accuracy: `trace / total`.
//! - Mean class accuracy: `diag / row_sum`, averaged over classes present in the
//!   ground truth.
//! - Mean IoU: `diag / (row_sum + col_sum - diag)`, averaged over classes whose
//!   union is non-empty.
//! - Frequency-weighted accuracy: sum of `frequency * IoU` over classes present in
//!   the ground truth.
//!
//! Classes without ground-truth pixels have undefined ratios. They are left out of
//! the averages rather than counted as zero, so a batch missing a class neither
//! fails nor drags the score down.
//!
//! Also provided: a running loss average, a best-score watermark for checkpointing,
//! and median-frequency class weights for imbalanced datasets.

mod confusion;
mod running;
mod weights;

pub use confusion::{ConfusionMatrix, SegmentationScores};
pub use running::{BestScore, RunningLoss};
pub use weights::{median_frequency_weights, ClassHistogram};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
