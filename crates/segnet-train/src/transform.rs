//! Per-sample preprocessing applied by folder datasets.
//!
//! Images become interleaved `[height, width, channels]` floats scaled to `[0, 1]`
//! and optionally normalized per channel. Labels become raw 8-bit class values,
//! optionally remapped through a lookup table.

use burn::config::Config;
use image::DynamicImage;

use crate::error::{DatasetError, DatasetResult};

/// Decoded image in interleaved `[height, width, channels]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlanes {
    pub data: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// Decoded label map in row-major `[height, width]` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    pub data: Vec<i64>,
    pub height: usize,
    pub width: usize,
}

/// Crop the centered `[height, width]` window; sizes larger than the image are clamped.
fn center_crop(image: DynamicImage, [height, width]: [u32; 2]) -> DynamicImage {
    let height = height.min(image.height());
    let width = width.min(image.width());
    let top = (image.height() - height) / 2;
    let left = (image.width() - width) / 2;

    image.crop_imm(left, top, width, height)
}

/// Input image preprocessing.
#[derive(Config, Debug, PartialEq)]
pub struct ImageTransform {
    /// Centered crop as `[height, width]`.
    #[config(default = "None")]
    pub center_crop: Option<[u32; 2]>,
    /// Decode to a single luminance channel instead of RGB.
    #[config(default = false)]
    pub grayscale: bool,
    /// Per-channel mean subtracted after scaling to `[0, 1]`.
    #[config(default = "None")]
    pub mean: Option<Vec<f32>>,
    /// Per-channel standard deviation divided out after the mean.
    #[config(default = "None")]
    pub std: Option<Vec<f32>>,
}

impl ImageTransform {
    /// Number of channels produced by [`apply`](Self::apply).
    pub const fn channels(&self) -> usize {
        if self.grayscale {
            1
        } else {
            3
        }
    }

    /// Crop, decode and normalize one image.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::ChannelMismatch` if the normalization statistics do
    /// not have one entry per channel.
    pub fn apply(&self, image: DynamicImage) -> DatasetResult<ImagePlanes> {
        let image = match self.center_crop {
            Some(size) => center_crop(image, size),
            None => image,
        };
        let height = image.height() as usize;
        let width = image.width() as usize;
        let channels = self.channels();

        let mut data = if self.grayscale {
            image.to_luma32f().into_raw()
        } else {
            image.to_rgb32f().into_raw()
        };

        if let (Some(mean), Some(std)) = (&self.mean, &self.std) {
            for stats in [mean, std] {
                if stats.len() != channels {
                    return Err(DatasetError::ChannelMismatch {
                        expected: stats.len(),
                        actual: channels,
                    });
                }
            }
            for pixel in data.chunks_exact_mut(channels) {
                for ((value, mean), std) in pixel.iter_mut().zip(mean).zip(std) {
                    *value = (*value - mean) / std;
                }
            }
        }

        Ok(ImagePlanes {
            data,
            height,
            width,
            channels,
        })
    }
}

/// Label image preprocessing.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct LabelTransform {
    /// Centered crop as `[height, width]`; should match the image crop.
    #[config(default = "None")]
    pub center_crop: Option<[u32; 2]>,
    /// `[raw, class]` pairs applied to the 8-bit label values.
    #[config(default = "Vec::new()")]
    pub relabel: Vec<[i64; 2]>,
}

impl LabelTransform {
    fn lookup(&self) -> [i64; 256] {
        let mut table = [0i64; 256];
        for (value, class) in table.iter_mut().enumerate() {
            *class = value as i64;
        }
        for &[raw, class] in &self.relabel {
            if let Some(slot) = usize::try_from(raw).ok().and_then(|raw| table.get_mut(raw)) {
                *slot = class;
            }
        }
        table
    }

    /// Crop and decode one label image.
    pub fn apply(&self, label: DynamicImage) -> LabelMap {
        let label = match self.center_crop {
            Some(size) => center_crop(label, size),
            None => label,
        };
        let height = label.height() as usize;
        let width = label.width() as usize;
        let table = self.lookup();

        let data = label
            .to_luma8()
            .into_raw()
            .into_iter()
            .map(|value| table[usize::from(value)])
            .collect();

        LabelMap {
            data,
            height,
            width,
        }
    }
}

/// Preprocessing of every file of one sample.
#[derive(Config, Debug, PartialEq)]
pub struct TransformConfig {
    #[config(default = "ImageTransform::new()")]
    pub image: ImageTransform,
    /// Transform of the second-modality image; falls back to `image`.
    #[config(default = "None")]
    pub modality: Option<ImageTransform>,
    #[config(default = "LabelTransform::new()")]
    pub label: LabelTransform,
}

impl TransformConfig {
    /// Transform used for the second-modality image.
    pub fn modality_transform(&self) -> &ImageTransform {
        self.modality.as_ref().unwrap_or(&self.image)
    }

    /// Channels of a loaded sample, counting the modality image only when a
    /// modality directory is read.
    pub fn input_channels(&self, with_modality: bool) -> usize {
        let modality = if with_modality {
            self.modality_transform().channels()
        } else {
            0
        };
        self.image.channels() + modality
    }

    /// Configuration problems, one message per issue.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut images = vec![("image", &self.image)];
        if let Some(modality) = &self.modality {
            images.push(("modality", modality));
        }

        for (name, transform) in images {
            match (&transform.mean, &transform.std) {
                (Some(_), None) | (None, Some(_)) => {
                    issues.push(format!("{name} transform needs both mean and std"));
                }
                (Some(mean), Some(std)) => {
                    let channels = transform.channels();
                    if mean.len() != channels || std.len() != channels {
                        issues.push(format!(
                            "{name} transform normalizes {} channels, images have {channels}",
                            mean.len().max(std.len())
                        ));
                    }
                    if std.iter().any(|value| *value <= 0.0) {
                        issues.push(format!("{name} transform std must be positive"));
                    }
                }
                (None, None) => {}
            }
        }

        if self.image.center_crop != self.label.center_crop {
            issues.push("image and label center crops differ".to_string());
        }

        issues
    }
}
