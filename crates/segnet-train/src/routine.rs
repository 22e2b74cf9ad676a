//! The training routine.
//!
//! A [`RoutineBuilder`] collects the model, the data sources and the device, and
//! checks all of them at once in [`RoutineBuilder::validate`]. Only a valid
//! configuration turns into a [`Routine`], whose [`fit`](Routine::fit) runs the
//! epochs strictly in sequence: train, then validate and score, then keep a
//! checkpoint when mean IoU did not decrease.

use std::sync::Arc;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use segnet_metric::{BestScore, ConfusionMatrix, RunningLoss, SegmentationScores};
use segnet_model::SegmentationModel;
use tracing::{debug, info, warn};

use crate::{
    checkpoint::FileCheckpointer,
    config::RoutineConfig,
    dataset::{FolderConfig, SegmentationBatch, SegmentationBatcher, SegmentationFolder},
    error::{RoutineError, RoutineResult},
    log::MetricsLog,
    loss::PixelCrossEntropy,
    transform::TransformConfig,
    validation::ValidationReport,
};

/// Loader yielding segmentation batches on backend `B`.
pub type SegmentationLoader<B> = Arc<dyn DataLoader<B, SegmentationBatch<B>>>;

/// Where the batches of one split come from.
pub enum DataSource<B: Backend> {
    /// A ready-made loader, used as is.
    Loader(SegmentationLoader<B>),
    /// An image/label folder pair, loaded with the routine's transforms.
    Folder(FolderConfig),
}

/// Collects everything a [`Routine`] needs.
pub struct RoutineBuilder<B: AutodiffBackend, M> {
    config: RoutineConfig,
    model: Option<M>,
    train: Option<DataSource<B>>,
    valid: Option<DataSource<B::InnerBackend>>,
    transforms: Option<TransformConfig>,
    device: Option<B::Device>,
}

impl<B, M> RoutineBuilder<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    pub fn new(config: RoutineConfig) -> Self {
        Self {
            config,
            model: None,
            train: None,
            valid: None,
            transforms: None,
            device: None,
        }
    }

    #[must_use]
    pub fn model(mut self, model: M) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn train_loader(mut self, loader: SegmentationLoader<B>) -> Self {
        self.train = Some(DataSource::Loader(loader));
        self
    }

    #[must_use]
    pub fn valid_loader(mut self, loader: SegmentationLoader<B::InnerBackend>) -> Self {
        self.valid = Some(DataSource::Loader(loader));
        self
    }

    #[must_use]
    pub fn train_folder(mut self, folder: FolderConfig) -> Self {
        self.train = Some(DataSource::Folder(folder));
        self
    }

    #[must_use]
    pub fn valid_folder(mut self, folder: FolderConfig) -> Self {
        self.valid = Some(DataSource::Folder(folder));
        self
    }

    /// Preprocessing applied to folder sources.
    #[must_use]
    pub fn transforms(mut self, transforms: TransformConfig) -> Self {
        self.transforms = Some(transforms);
        self
    }

    /// Device used when `accelerate` is set.
    #[must_use]
    pub fn device(mut self, device: B::Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Check the whole configuration without acquiring anything.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        let config = &self.config;

        match &self.model {
            None => report.error("a model is required"),
            Some(model) => {
                let classes = model.num_classes();
                if let Some(n_classes) = config.n_classes.filter(|&n| n != classes) {
                    report.error(format!(
                        "n_classes is {n_classes} but the model predicts {classes} classes"
                    ));
                }
                if let Some(weights) = &config.loss.class_weights {
                    let expected = config.n_classes.unwrap_or(classes);
                    if weights.len() != expected {
                        report.error(format!(
                            "{} class weights given for {expected} classes",
                            weights.len()
                        ));
                    }
                }
            }
        }
        if let Some(weights) = &config.loss.class_weights {
            if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
                report.error("class weights must be finite and non-negative");
            }
        }

        let sources = [
            ("training", self.train.as_ref().map(DataSource::is_folder)),
            ("validation", self.valid.as_ref().map(DataSource::is_folder)),
        ];
        for (split, source) in sources {
            match source {
                None => report.error(format!(
                    "a {split} loader or a {split} image/label folder pair is required"
                )),
                Some(true) if self.transforms.is_none() => report.error(format!(
                    "the {split} folder needs input and target transforms"
                )),
                Some(_) => {}
            }
        }
        if let Some(transforms) = &self.transforms {
            for issue in transforms.issues() {
                report.error(issue);
            }
        }

        let folders = [
            ("training", self.train.as_ref().and_then(DataSource::folder)),
            ("validation", self.valid.as_ref().and_then(DataSource::folder)),
        ];
        if let (Some(model), Some(transforms)) = (&self.model, &self.transforms) {
            let expected = model.in_channels();
            for (split, folder) in folders {
                let Some(folder) = folder else {
                    continue;
                };
                let channels = transforms.input_channels(folder.modality.is_some());
                if channels != expected {
                    report.error(format!(
                        "the {split} folder yields {channels} input channels \
                         but the model reads {expected}"
                    ));
                }
            }
        }
        if let [(_, Some(train)), (_, Some(valid))] = folders {
            if train.modality.is_some() != valid.modality.is_some() {
                report.error(
                    "training and validation folders disagree on the modality directory",
                );
            }
        }

        if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
            report.error(format!(
                "learning rate must be positive, got {}",
                config.learning_rate
            ));
        }
        if config.max_epochs == 0 {
            report.error("max_epochs must be at least 1");
        }
        if config.batch_size == 0 {
            report.error("batch_size must be at least 1");
        }

        if config.log_file.is_none() {
            report.warn("no log file: metrics estimation and checkpointing are disabled");
        }
        if config.shuffle && matches!(self.valid, Some(DataSource::Folder(_))) {
            report.warn("shuffle applies to the training folder only");
        }
        if self.device.is_some() && !config.accelerate {
            report.warn("a device was given but accelerate is off; using the default device");
        }

        report
    }

    /// Validate, then build loaders and place the model.
    ///
    /// # Errors
    ///
    /// - `RoutineError::InvalidConfiguration` with every problem found by
    ///   [`validate`](Self::validate).
    /// - `RoutineError::Dataset` if a folder cannot be read.
    pub fn build(self) -> RoutineResult<Routine<B, M>> {
        let report = self.validate();
        for warning in &report.warnings {
            warn!("{warning}");
        }
        if !report.is_valid() {
            return Err(RoutineError::InvalidConfiguration(report));
        }

        let Self {
            config,
            model: Some(model),
            train: Some(train),
            valid: Some(valid),
            transforms,
            device,
        } = self
        else {
            return Err(RoutineError::InvalidConfiguration(report));
        };

        let device = match (config.accelerate, device) {
            (true, Some(device)) => device,
            _ => B::Device::default(),
        };
        let model = if config.accelerate {
            model.fork(&device)
        } else {
            model
        };
        let n_classes = config.n_classes.unwrap_or_else(|| model.num_classes());
        let loss = config.loss.init::<B>(&device);

        let transforms = transforms.unwrap_or_else(TransformConfig::new);
        let train_loader = train.into_loader(&config, &transforms, config.shuffle)?;
        let valid_loader = valid.into_loader(&config, &transforms, false)?;

        info!(
            learning_rate = config.learning_rate,
            max_epochs = config.max_epochs,
            n_classes,
            accelerate = config.accelerate,
            ?device,
            "routine configured"
        );

        Ok(Routine {
            config,
            model,
            loss,
            train_loader,
            valid_loader,
            device,
            n_classes,
        })
    }
}

impl<B: Backend> DataSource<B> {
    const fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    const fn folder(&self) -> Option<&FolderConfig> {
        match self {
            Self::Folder(folder) => Some(folder),
            Self::Loader(_) => None,
        }
    }

    fn into_loader(
        self,
        config: &RoutineConfig,
        transforms: &TransformConfig,
        shuffle: bool,
    ) -> RoutineResult<SegmentationLoader<B>> {
        match self {
            Self::Loader(loader) => Ok(loader),
            Self::Folder(folder) => {
                let dataset = SegmentationFolder::new(&folder, transforms.clone())?;
                let mut builder = DataLoaderBuilder::new(SegmentationBatcher::<B>::new())
                    .batch_size(config.batch_size);
                if shuffle {
                    builder = builder.shuffle(config.seed);
                }
                if config.num_workers > 0 {
                    builder = builder.num_workers(config.num_workers);
                }
                Ok(builder.build(dataset))
            }
        }
    }
}

/// Summary of one finished epoch.
#[derive(Debug, Clone)]
pub struct EpochSummary {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub loss: f64,
    /// Validation scores; absent when metrics are disabled.
    pub scores: Option<SegmentationScores>,
    /// Whether this epoch was written as the new best checkpoint.
    pub checkpointed: bool,
}

/// What [`Routine::fit`] hands back.
#[derive(Debug)]
pub struct TrainingReport<M> {
    /// The model after the last epoch.
    pub model: M,
    pub epochs: Vec<EpochSummary>,
    /// `(epoch, mean IoU)` of the best checkpoint.
    pub best: Option<(usize, f64)>,
}

/// A validated, ready-to-run training routine.
pub struct Routine<B: AutodiffBackend, M> {
    config: RoutineConfig,
    model: M,
    loss: PixelCrossEntropy<B>,
    train_loader: SegmentationLoader<B>,
    valid_loader: SegmentationLoader<B::InnerBackend>,
    device: B::Device,
    n_classes: usize,
}

impl<B, M> Routine<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    pub fn builder(config: RoutineConfig) -> RoutineBuilder<B, M> {
        RoutineBuilder::new(config)
    }

    pub const fn config(&self) -> &RoutineConfig {
        &self.config
    }

    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Train for `max_epochs` epochs.
    ///
    /// Every batch runs forward, loss, backward and one Adam step. With a log file
    /// configured, each epoch then scores the validation split on
    /// [`valid`](AutodiffModule::valid), appends a summary line and checkpoints
    /// the model and optimizer when mean IoU is at least the best so far. The log
    /// is flushed and closed when training ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file or a checkpoint cannot be written, if a
    /// batch does not match the model's input channels, or if a loader stops
    /// before yielding every item of its dataset.
    pub fn fit(self) -> RoutineResult<TrainingReport<M>> {
        let Self {
            config,
            mut model,
            loss,
            train_loader,
            valid_loader,
            device,
            n_classes,
        } = self;

        B::seed(config.seed);

        let mut optimizer = AdamConfig::new().init::<B, M>();
        let mut log = config.log_file.as_ref().map(MetricsLog::create).transpose()?;
        let checkpointer = FileCheckpointer::new(&config.checkpoint_dir);
        let mut best = BestScore::new();
        let mut epochs = Vec::with_capacity(config.max_epochs);

        for epoch in 1..=config.max_epochs {
            let mut running = RunningLoss::new();
            let mut items = 0;

            for batch in train_loader.iter() {
                items += check_batch("training", &batch, model.in_channels())?;
                let images = batch.images.to_device(&device);
                let targets = batch.targets.to_device(&device);

                let output = model.forward(images);
                let batch_loss = loss.forward(output, targets);
                running.update(batch_loss.clone().into_scalar().elem::<f64>());

                let grads = GradientsParams::from_grads(batch_loss.backward(), &model);
                model = optimizer.step(config.learning_rate, model, grads);
            }

            check_complete("training", items, train_loader.num_items())?;
            if running.count() == 0 {
                warn!(epoch, "training loader yielded no batches");
            }
            info!(
                epoch,
                max_epochs = config.max_epochs,
                batches = running.count(),
                loss = running.mean(),
                "averaged loss"
            );

            let mut summary = EpochSummary {
                epoch,
                loss: running.mean(),
                scores: None,
                checkpointed: false,
            };

            if let Some(log) = log.as_mut() {
                let matrix = evaluate(&model.valid(), valid_loader.as_ref(), n_classes, &device)?;
                let scores = matrix.scores();
                info!(
                    epoch,
                    overall_accuracy = scores.overall_accuracy,
                    mean_accuracy = scores.mean_accuracy,
                    mean_iou = scores.mean_iou,
                    "validation scores"
                );
                log.write_epoch(epoch, config.max_epochs, summary.loss, &scores)?;

                if best.observe(epoch, scores.mean_iou) {
                    checkpointer.save(epoch, scores.mean_iou, &model, &optimizer)?;
                    summary.checkpointed = true;
                } else {
                    debug!(epoch, mean_iou = scores.mean_iou, "no improvement");
                }
                summary.scores = Some(scores);
            }

            epochs.push(summary);
        }

        if let Some(log) = log {
            log.close()?;
        }

        Ok(TrainingReport {
            model,
            epochs,
            best: best.best(),
        })
    }
}

/// Number of items in `batch`, once its channels are known to fit the model.
fn check_batch<B: Backend>(
    split: &'static str,
    batch: &SegmentationBatch<B>,
    in_channels: usize,
) -> RoutineResult<usize> {
    let [items, channels, _, _] = batch.images.dims();
    if channels != in_channels {
        return Err(RoutineError::InputChannels {
            split,
            expected: in_channels,
            actual: channels,
        });
    }
    Ok(items)
}

/// A pass must see the whole dataset; a loader that stops early drops samples.
fn check_complete(split: &'static str, yielded: usize, expected: usize) -> RoutineResult<()> {
    if yielded < expected {
        return Err(RoutineError::IncompleteEpoch {
            split,
            yielded,
            expected,
        });
    }
    Ok(())
}

/// Fold every batch of `loader` into a confusion matrix.
///
/// Predictions are the arg-max over the class axis of `model`'s scores. Run it on
/// an inference model (for instance `model.valid()`) so no gradients are tracked
/// and normalization statistics stay frozen.
///
/// # Errors
///
/// Returns an error if a batch does not match the model's input channels, or if
/// the loader stops before yielding every item of its dataset.
pub fn evaluate<B, M>(
    model: &M,
    loader: &dyn DataLoader<B, SegmentationBatch<B>>,
    n_classes: usize,
    device: &B::Device,
) -> RoutineResult<ConfusionMatrix>
where
    B: Backend,
    M: SegmentationModel<B>,
{
    let mut matrix = ConfusionMatrix::new(n_classes);
    let mut items = 0;

    for batch in loader.iter() {
        items += check_batch("validation", &batch, model.in_channels())?;
        let scores = model.forward(batch.images.to_device(device));
        let predictions = scores.argmax(1).squeeze::<3>(1);
        matrix.update_tensors(batch.targets, predictions);
    }
    check_complete("validation", items, loader.num_items())?;

    Ok(matrix)
}
