use std::path::PathBuf;

use burn::config::Config;

use crate::loss::LossConfig;

/// Settings of a training run.
#[derive(Config, Debug)]
pub struct RoutineConfig {
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    #[config(default = 10)]
    pub max_epochs: usize,

    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,

    /// Move the model and loss to the routine's device before training.
    #[config(default = false)]
    pub accelerate: bool,

    /// Per-epoch metrics file. Without it no validation scores are computed and
    /// no checkpoint is written.
    #[config(default = "None")]
    pub log_file: Option<PathBuf>,

    /// Number of classes scored; defaults to the model's class count.
    #[config(default = "None")]
    pub n_classes: Option<usize>,

    #[config(default = "PathBuf::from(\"artifacts\")")]
    pub checkpoint_dir: PathBuf,

    /// Batch size of loaders built from folders.
    #[config(default = 10)]
    pub batch_size: usize,

    /// Shuffle the training folder each epoch. Validation is never shuffled.
    #[config(default = false)]
    pub shuffle: bool,

    /// Worker threads of loaders built from folders; 0 loads on the calling thread.
    #[config(default = 10)]
    pub num_workers: usize,

    /// Seeds the backend when `fit` starts, which drives shuffling and dropout.
    /// Weight initialization follows it only when the backend is seeded before
    /// the model is built, as the `segnet` binary does.
    #[config(default = 42)]
    pub seed: u64,
}
