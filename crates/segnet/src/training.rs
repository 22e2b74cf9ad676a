use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use burn::{
    config::Config,
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
};
use segnet_backbones::VggVariant;
use segnet_metric::{median_frequency_weights, ClassHistogram, SegmentationScores};
use segnet_model::{Architecture, SegmentationNetwork};
use segnet_train::{
    evaluate, FileCheckpointer, FolderConfig, Routine, RoutineBuilder, RoutineConfig,
    SegmentationBatcher, SegmentationFolder, SegmentationLoader, TransformConfig,
};

use crate::backend::burn_backend_types::{
    InferenceBackend, InferenceDevice, TrainingBackend, NAME,
};

/// CLI arguments of the `train` subcommand.
#[derive(Debug, Clone, Default)]
pub struct TrainingCliArgs {
    /// Path to the JSON training configuration.
    pub config_path: PathBuf,
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub batch_size: Option<usize>,
    /// torchvision VGG16 checkpoint used to seed the encoder.
    pub pretrained: Option<PathBuf>,
}

/// Image/label folders of both splits.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    pub train: FolderConfig,
    pub valid: FolderConfig,
}

/// Everything needed to train or evaluate a network, loaded from JSON.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub architecture: Architecture,

    /// Channels of the (first) input modality.
    #[config(default = 3)]
    pub in_channels: usize,

    pub n_classes: usize,

    #[config(default = "RoutineConfig::new()")]
    pub routine: RoutineConfig,

    pub dataset: DatasetConfig,

    #[config(default = "TransformConfig::new()")]
    pub transforms: TransformConfig,

    /// Layout of the pretrained encoder checkpoint.
    #[config(default = "VggVariant::Vgg16")]
    pub backbone: VggVariant,

    /// Replace the loss' class weights with median frequency balancing weights
    /// computed from the training labels.
    #[config(default = false)]
    pub median_frequency_balancing: bool,
}

impl TrainingConfig {
    /// Loads a training configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build the configured network on `device`.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the network description.
    pub fn network<B: Backend>(&self, device: &B::Device) -> Result<SegmentationNetwork<B>> {
        self.architecture
            .config(self.in_channels, self.n_classes)
            .init(device)
            .context("invalid network description")
    }

    /// Seed the backend with `routine.seed`, then build the network, so the
    /// initial weights are reproducible.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the network description.
    pub fn seeded_network<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SegmentationNetwork<B>> {
        B::seed(self.routine.seed);
        self.network(device)
    }

    fn apply_overrides(&mut self, args: &TrainingCliArgs) {
        if let Some(epochs) = args.epochs {
            self.routine.max_epochs = epochs;
        }
        if let Some(learning_rate) = args.learning_rate {
            self.routine.learning_rate = learning_rate;
        }
        if let Some(batch_size) = args.batch_size {
            self.routine.batch_size = batch_size;
        }
    }
}

/// Median frequency balancing weights of the training split.
///
/// # Errors
///
/// Returns an error if the training folder cannot be read.
pub fn class_weights(config: &TrainingConfig) -> Result<Vec<f32>> {
    let dataset = SegmentationFolder::new(&config.dataset.train, config.transforms.clone())?;
    let mut histogram = ClassHistogram::new(config.n_classes);

    for index in 0..dataset.len() {
        let item = dataset
            .load(index)?
            .with_context(|| format!("training sample {index} disappeared"))?;
        histogram.update_image(&item.label);
    }

    Ok(median_frequency_weights(&histogram))
}

#[cfg(feature = "pretrained")]
fn seed_encoder<B: Backend>(
    network: SegmentationNetwork<B>,
    path: &Path,
    variant: VggVariant,
    device: &B::Device,
) -> Result<SegmentationNetwork<B>> {
    let vgg = segnet_backbones::load_torchvision(path, variant, device)?;
    Ok(network.init_encoder(&vgg)?)
}

#[cfg(not(feature = "pretrained"))]
fn seed_encoder<B: Backend>(
    _network: SegmentationNetwork<B>,
    path: &Path,
    _variant: VggVariant,
    _device: &B::Device,
) -> Result<SegmentationNetwork<B>> {
    bail!(
        "cannot load {}: built without the `pretrained` feature",
        path.display()
    )
}

type Network = SegmentationNetwork<TrainingBackend>;

/// Routine over the configured folders; the device is only handed over when
/// `accelerate` is set.
fn routine_builder(
    config: &TrainingConfig,
    device: InferenceDevice,
) -> RoutineBuilder<TrainingBackend, Network> {
    let builder = Routine::builder(config.routine.clone())
        .train_folder(config.dataset.train.clone())
        .valid_folder(config.dataset.valid.clone())
        .transforms(config.transforms.clone());

    if config.routine.accelerate {
        builder.device(device)
    } else {
        builder
    }
}

/// Train a network from a CLI configuration.
///
/// # Errors
///
/// Returns an error if the configuration is missing, unreadable or rejected, if
/// the pretrained weights do not fit, or if training fails.
pub fn run_training(args: TrainingCliArgs) -> Result<()> {
    if !args.config_path.exists() {
        bail!(
            "Configuration file not found: {}",
            args.config_path.display()
        );
    }

    let mut config = TrainingConfig::load(&args.config_path)?;
    config.apply_overrides(&args);

    if config.median_frequency_balancing {
        let weights = class_weights(&config)?;
        tracing::info!(?weights, "median frequency balancing");
        config.routine.loss.class_weights = Some(weights);
    }

    tracing::info!(
        architecture = ?config.architecture,
        n_classes = config.n_classes,
        learning_rate = config.routine.learning_rate,
        batch_size = config.routine.batch_size,
        epochs = config.routine.max_epochs,
        backend = NAME,
        "configuration loaded"
    );

    let device = InferenceDevice::default();
    let mut network = config.seeded_network::<TrainingBackend>(&device)?;
    if let Some(path) = &args.pretrained {
        network = seed_encoder(network, path, config.backbone.clone(), &device)
            .with_context(|| format!("failed to seed the encoder from {}", path.display()))?;
    }

    let routine = routine_builder(&config, device).model(network).build()?;

    let report = routine.fit()?;
    match report.best {
        Some((epoch, mean_iou)) => {
            tracing::info!(epoch, mean_iou, "training completed");
        }
        None => tracing::info!(epochs = report.epochs.len(), "training completed"),
    }

    Ok(())
}

/// Scores a checkpoint on the validation split of a configuration.
///
/// # Errors
///
/// Returns an error if the configuration, the checkpoint or the validation
/// folder cannot be read.
pub fn run_evaluation(config_path: &Path, checkpoint: &Path) -> Result<SegmentationScores> {
    let config = TrainingConfig::load(config_path)?;
    let device = InferenceDevice::default();

    let network = config.network::<InferenceBackend>(&device)?;
    let (network, manifest) = FileCheckpointer::new(checkpoint)
        .restore::<InferenceBackend, _>(network, &device)?;
    tracing::info!(
        epoch = manifest.epoch,
        mean_iou = manifest.mean_iou,
        "checkpoint restored"
    );

    let dataset = SegmentationFolder::new(&config.dataset.valid, config.transforms.clone())?;
    let loader: SegmentationLoader<InferenceBackend> =
        DataLoaderBuilder::new(SegmentationBatcher::<InferenceBackend>::new())
            .batch_size(config.routine.batch_size.max(1))
            .build(dataset);

    let n_classes = config.routine.n_classes.unwrap_or(config.n_classes);
    let matrix = evaluate(&network, loader.as_ref(), n_classes, &device)?;

    Ok(matrix.scores())
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};
    use segnet_model::Stage;

    use super::*;

    const CONFIG: &str = r#"{
        "architecture": { "MultiSegNet": 1 },
        "n_classes": 4,
        "dataset": {
            "train": { "images": "train/images", "labels": "train/labels", "modality": "train/depth" },
            "valid": { "images": "valid/images", "labels": "valid/labels", "modality": "valid/depth" }
        },
        "transforms": { "modality": { "grayscale": true } },
        "routine": { "max_epochs": 50, "log_file": "log.txt" }
    }"#;

    #[test]
    fn json_fills_defaults() {
        let config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();

        assert_eq!(config.architecture, Architecture::MultiSegNet(1));
        assert_eq!(config.in_channels, 3);
        assert_eq!(config.routine.max_epochs, 50);
        assert_eq!(config.routine.learning_rate, 1e-3);
        assert_eq!(config.dataset.valid.modality, Some(PathBuf::from("valid/depth")));
        assert_eq!(config.backbone, VggVariant::Vgg16);
        assert!(!config.median_frequency_balancing);
        // RGB plus a single-channel modality feeds both towers
        assert_eq!(
            config.transforms.input_channels(true),
            config.architecture.total_in_channels(config.in_channels)
        );
    }

    #[test]
    fn cli_overrides_replace_routine_settings() {
        let mut config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();
        config.apply_overrides(&TrainingCliArgs {
            epochs: Some(2),
            batch_size: Some(4),
            ..TrainingCliArgs::default()
        });

        assert_eq!(config.routine.max_epochs, 2);
        assert_eq!(config.routine.batch_size, 4);
        assert_eq!(config.routine.learning_rate, 1e-3);
    }

    #[test]
    fn configuration_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        let config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.n_classes, 4);
        assert_eq!(loaded.dataset.train.images, PathBuf::from("train/images"));
    }

    #[test]
    fn class_weights_follow_training_labels() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let labels = dir.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        for stem in ["a", "b"] {
            GrayImage::from_pixel(2, 2, Luma([0]))
                .save(images.join(format!("{stem}.png")))
                .unwrap();
        }
        // a: three pixels of class 0, one of class 1; b: all class 0
        GrayImage::from_fn(2, 2, |x, y| Luma([u8::from(x == 1 && y == 1)]))
            .save(labels.join("a.png"))
            .unwrap();
        GrayImage::from_pixel(2, 2, Luma([0]))
            .save(labels.join("b.png"))
            .unwrap();

        let mut config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();
        config.n_classes = 3;
        config.dataset.train = FolderConfig::new(images, labels);

        let weights = class_weights(&config).unwrap();

        assert_eq!(weights.len(), 3);
        assert!(weights[1] > weights[0]);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn device_is_only_passed_when_accelerating() {
        let mut config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();

        let idle = routine_builder(&config, InferenceDevice::default()).validate();
        config.routine.accelerate = true;
        let accelerated = routine_builder(&config, InferenceDevice::default()).validate();

        for report in [idle, accelerated] {
            assert!(
                report.warnings.iter().all(|warning| !warning.contains("device")),
                "{report}"
            );
        }
    }

    fn first_conv(network: SegmentationNetwork<InferenceBackend>) -> Tensor<InferenceBackend, 4> {
        match &network.towers[0].stages[0] {
            Stage::Encoder(stage) => stage.block.blocks.blocks[0].conv.weight.val(),
            _ => panic!("SegNet starts with an encoder"),
        }
    }

    #[test]
    fn seed_fixes_the_initial_weights() {
        let device = Default::default();
        let mut config: TrainingConfig = serde_json::from_str(CONFIG).unwrap();
        config.architecture = Architecture::SegNet;
        config.in_channels = 1;
        let a = first_conv(config.seeded_network(&device).unwrap());
        let b = first_conv(config.seeded_network(&device).unwrap());
        config.routine.seed += 1;
        let c = first_conv(config.seeded_network(&device).unwrap());

        a.clone().into_data().assert_eq(&b.into_data(), true);
        assert!(!a.equal(c).all().into_scalar());
    }

    #[test]
    fn missing_configuration_is_an_error() {
        let result = run_training(TrainingCliArgs {
            config_path: PathBuf::from("does/not/exist.json"),
            ..TrainingCliArgs::default()
        });

        assert!(result.unwrap_err().to_string().contains("not found"));
    }
}
