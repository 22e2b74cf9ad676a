//! Folder dataset and batcher for segmentation training.
//!
//! A split is an image directory and a label directory whose files pair by stem,
//! plus an optional second-modality image directory stacked on the channel axis.
//! The dataset returns raw per-sample data; the batcher creates tensors on the
//! requested device.

use std::{
    collections::HashMap,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use burn::{
    config::Config,
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use derive_new::new;
use image::ImageFormat;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::{
    error::{DatasetError, DatasetResult},
    transform::TransformConfig,
};

/// One preprocessed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationItem {
    /// Interleaved `[height, width, channels]` image data.
    pub image: Vec<f32>,
    /// Row-major `[height, width]` class labels.
    pub label: Vec<i64>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// A batch of images and their label maps.
#[derive(new, Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch, height, width]`
    pub targets: Tensor<B, 3, Int>,
}

/// Stacks [`SegmentationItem`]s into a [`SegmentationBatch`].
///
/// Items of one batch must share their size; crop or resize them upstream.
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let image = Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [item.height, item.width, item.channels]),
                device,
            )
            .permute([2, 0, 1]);
            let target = Tensor::<B, 2, Int>::from_data(
                TensorData::new(item.label, [item.height, item.width]),
                device,
            );

            images.push(image);
            targets.push(target);
        }

        SegmentationBatch::new(Tensor::stack(images, 0), Tensor::stack(targets, 0))
    }
}

/// Directories of one dataset split.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct FolderConfig {
    /// Directory of input images.
    pub images: PathBuf,
    /// Directory of label images, one per input image with the same stem.
    pub labels: PathBuf,
    /// Directory of second-modality images, one per input image with the same stem.
    #[config(default = "None")]
    pub modality: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sample {
    image: PathBuf,
    label: PathBuf,
    modality: Option<PathBuf>,
}

/// Image/label folder dataset.
///
/// Every file's header is read when the folder is collected, so unreadable files
/// and size mismatches surface as errors before training starts. A sample that
/// still fails to decode later panics in [`Dataset::get`]: returning `None`
/// would end the loader's pass early and silently drop the remaining samples.
pub struct SegmentationFolder {
    samples: Vec<Sample>,
    transforms: TransformConfig,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| ImageFormat::from_extension(extension).is_some())
}

/// Image files of `dir` keyed by stem, without descending into subdirectories.
fn files_by_stem(dir: &Path) -> DatasetResult<HashMap<String, PathBuf>> {
    let mut files = HashMap::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| DatasetError::DirectoryReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.into_path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| DatasetError::NoFileStem { path: path.clone() })?
            .to_string();
        if let Some(previous) = files.insert(stem, path.clone()) {
            warn!(kept = %path.display(), dropped = %previous.display(), "duplicate stem");
        }
    }

    Ok(files)
}

/// `[height, width]` from the file header, without decoding pixels.
fn dimensions(path: &Path) -> DatasetResult<[u32; 2]> {
    let (width, height) =
        image::image_dimensions(path).map_err(|source| DatasetError::ImageOpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok([height, width])
}

/// Size after a center crop, which is clamped to the image.
fn cropped([height, width]: [u32; 2], crop: Option<[u32; 2]>) -> [usize; 2] {
    let [crop_height, crop_width] = crop.unwrap_or([height, width]);
    [
        crop_height.min(height) as usize,
        crop_width.min(width) as usize,
    ]
}

impl Sample {
    /// Check that every file is readable and matches the image once cropped.
    fn verify(&self, transforms: &TransformConfig) -> DatasetResult<()> {
        let expected = cropped(dimensions(&self.image)?, transforms.image.center_crop);

        let mut others = vec![(&self.label, transforms.label.center_crop)];
        if let Some(modality) = &self.modality {
            others.push((modality, transforms.modality_transform().center_crop));
        }
        for (path, crop) in others {
            let actual = cropped(dimensions(path)?, crop);
            if actual != expected {
                return Err(DatasetError::SizeMismatch {
                    path: path.clone(),
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }
}

fn open(path: &Path) -> DatasetResult<image::DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

impl SegmentationFolder {
    /// Pair the files of a split by stem.
    ///
    /// Images without a label (or without a modality image when a modality
    /// directory is configured) are skipped with a warning. Samples are ordered
    /// by stem.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory is missing or unreadable, if no complete
    /// sample is found, or if a paired file cannot be read or differs in size
    /// from its image.
    pub fn new(config: &FolderConfig, transforms: TransformConfig) -> DatasetResult<Self> {
        if !config.images.is_dir() {
            return Err(DatasetError::ImageDirectoryNotFound {
                path: config.images.clone(),
            });
        }
        if !config.labels.is_dir() {
            return Err(DatasetError::LabelDirectoryNotFound {
                path: config.labels.clone(),
            });
        }
        if let Some(modality) = config.modality.as_ref().filter(|dir| !dir.is_dir()) {
            return Err(DatasetError::ModalityDirectoryNotFound {
                path: modality.clone(),
            });
        }

        let images = files_by_stem(&config.images)?;
        let mut labels = files_by_stem(&config.labels)?;
        let mut modalities = match &config.modality {
            Some(dir) => Some(files_by_stem(dir)?),
            None => None,
        };

        let mut stems: Vec<&String> = images.keys().collect();
        stems.sort();

        let mut samples = Vec::with_capacity(stems.len());
        for stem in stems {
            let image = images[stem].clone();
            let Some(label) = labels.remove(stem) else {
                warn!(image = %image.display(), "no label found for image");
                continue;
            };
            let modality = match modalities.as_mut() {
                Some(modalities) => match modalities.remove(stem) {
                    Some(path) => Some(path),
                    None => {
                        warn!(image = %image.display(), "no modality image found for image");
                        continue;
                    }
                },
                None => None,
            };
            samples.push(Sample {
                image,
                label,
                modality,
            });
        }

        if samples.is_empty() {
            return Err(DatasetError::NoValidPairs {
                path: config.images.clone(),
            });
        }
        for sample in &samples {
            sample.verify(&transforms)?;
        }

        debug!(
            samples = samples.len(),
            images = %config.images.display(),
            "collected segmentation samples"
        );

        Ok(Self {
            samples,
            transforms,
        })
    }

    /// Image paths in sample order.
    pub fn image_paths(&self) -> impl Iterator<Item = &Path> {
        self.samples.iter().map(|sample| sample.image.as_path())
    }

    /// Load and preprocess sample `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be decoded, or if the label or the
    /// modality image differs in size from the image.
    pub fn load(&self, index: usize) -> DatasetResult<Option<SegmentationItem>> {
        let Some(sample) = self.samples.get(index) else {
            return Ok(None);
        };

        let image = self.transforms.image.apply(open(&sample.image)?)?;
        let expected = [image.height, image.width];
        let mut data = image.data;
        let mut channels = image.channels;

        if let Some(path) = &sample.modality {
            let modality = self
                .transforms
                .modality_transform()
                .apply(open(path)?)?;
            let actual = [modality.height, modality.width];
            if actual != expected {
                return Err(DatasetError::SizeMismatch {
                    path: path.clone(),
                    expected,
                    actual,
                });
            }
            data = interleave(&data, channels, &modality.data, modality.channels);
            channels += modality.channels;
        }

        let label = self.transforms.label.apply(open(&sample.label)?);
        let actual = [label.height, label.width];
        if actual != expected {
            return Err(DatasetError::SizeMismatch {
                path: sample.label.clone(),
                expected,
                actual,
            });
        }

        Ok(Some(SegmentationItem {
            image: data,
            label: label.data,
            height: expected[0],
            width: expected[1],
            channels,
        }))
    }
}

/// Concatenate two interleaved pixel buffers channel-wise.
fn interleave(
    first: &[f32],
    first_channels: usize,
    second: &[f32],
    second_channels: usize,
) -> Vec<f32> {
    let mut data = Vec::with_capacity(first.len() + second.len());
    for (a, b) in first
        .chunks_exact(first_channels)
        .zip(second.chunks_exact(second_channels))
    {
        data.extend_from_slice(a);
        data.extend_from_slice(b);
    }
    data
}

impl Dataset<SegmentationItem> for SegmentationFolder {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.load(index) {
            Ok(item) => item,
            Err(err) => {
                error!(index, error = %err, "failed to load sample");
                panic!("failed to load sample {index}: {err}");
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
