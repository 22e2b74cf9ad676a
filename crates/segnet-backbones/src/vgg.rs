//! VGG16 feature extractor.
//!
//! Only the convolutional `features` part of the torchvision model is kept; the
//! classifier has no counterpart in a segmentation encoder.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use segnet_extra_ops::max_pool2d;

use crate::WeightBank;

#[derive(Debug, Clone, Copy)]
enum Layer {
    Conv(usize),
    Pool,
}

use Layer::{Conv, Pool};

/// torchvision's configuration "D".
const VGG16: [Layer; 18] = [
    Conv(64),
    Conv(64),
    Pool,
    Conv(128),
    Conv(128),
    Pool,
    Conv(256),
    Conv(256),
    Conv(256),
    Pool,
    Conv(512),
    Conv(512),
    Conv(512),
    Pool,
    Conv(512),
    Conv(512),
    Conv(512),
    Pool,
];

/// VGG16 flavour.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum VggVariant {
    /// Plain VGG16: convolutions carry a bias.
    Vgg16,
    /// VGG16 with batch normalization after every convolution.
    Vgg16Bn,
}

impl VggVariant {
    /// Whether convolutions are followed by batch normalization.
    pub const fn batch_norm(&self) -> bool {
        matches!(self, Self::Vgg16Bn)
    }
}

/// Configuration of the VGG16 feature extractor.
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Network flavour.
    #[config(default = "VggVariant::Vgg16")]
    pub variant: VggVariant,
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
}

impl VggConfig {
    /// Initialize the feature extractor with Kaiming-normal convolutions.
    pub fn init<B: Backend>(&self, device: &B::Device) -> VggFeatures<B> {
        let batch_norm = self.variant.batch_norm();
        let mut channels = self.in_channels;
        let mut convs = Vec::new();

        for layer in VGG16 {
            if let Conv(out_channels) = layer {
                convs.push(VggConv::new(channels, out_channels, batch_norm, device));
                channels = out_channels;
            }
        }

        VggFeatures { convs }
    }
}

/// The `features` stack of VGG16.
#[derive(Module, Debug)]
pub struct VggFeatures<B: Backend> {
    /// Convolution units in forward order.
    pub convs: Vec<VggConv<B>>,
}

impl<B: Backend> VggFeatures<B> {
    /// Run the whole feature stack.
    ///
    /// # Shapes
    ///   - input: `[batch, in_channels, height, width]`
    ///   - output: `[batch, 512, height / 32, width / 32]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut convs = self.convs.iter();
        let mut x = input;

        for layer in VGG16 {
            x = match layer {
                Conv(_) => match convs.next() {
                    Some(conv) => conv.forward(x),
                    None => break,
                },
                Pool => max_pool2d(x),
            };
        }

        x
    }
}

impl<B: Backend> WeightBank<B> for VggFeatures<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        self.convs.iter().map(|unit| &unit.conv).collect()
    }
}

/// Convolution, optional batch normalization and ReLU.
#[derive(Module, Debug)]
pub struct VggConv<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: Option<BatchNorm<B, 2>>,
    relu: Relu,
}

impl<B: Backend> VggConv<B> {
    /// Forward pass.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.relu.forward(x)
    }

    fn new(in_channels: usize, out_channels: usize, batch_norm: bool, device: &B::Device) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // torchvision keeps the bias even in the batch-norm flavour.
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(initializer)
            .init(device);
        let norm = batch_norm.then(|| BatchNormConfig::new(out_channels).init(device));

        Self {
            conv,
            norm,
            relu: Relu::new(),
        }
    }
}

/// Key remaps from torchvision's `features.{index}` layout to [`VggFeatures`].
///
/// torchvision stores the stack as one flat `Sequential` in which every ReLU, batch
/// norm and pooling layer takes a slot, so the parameter indices depend on the
/// variant.
pub fn torchvision_key_remaps(variant: &VggVariant) -> Vec<(String, String)> {
    let mut remaps = Vec::new();
    let mut slot = 0;
    let mut unit = 0;

    for layer in VGG16 {
        match layer {
            Conv(_) => {
                remaps.push((
                    format!(r"^features\.{slot}\.(weight|bias)$"),
                    format!("convs.{unit}.conv.$1"),
                ));
                if variant.batch_norm() {
                    remaps.push((
                        format!(r"^features\.{}\.(.+)$", slot + 1),
                        format!("convs.{unit}.norm.$1"),
                    ));
                    slot += 3;
                } else {
                    slot += 2;
                }
                unit += 1;
            }
            Pool => slot += 1,
        }
    }

    remaps
}

/// Load a torchvision `vgg16` / `vgg16_bn` checkpoint (`.pth`).
#[cfg(feature = "pretrained")]
pub fn load_torchvision<B: Backend>(
    path: impl AsRef<std::path::Path>,
    variant: VggVariant,
    device: &B::Device,
) -> crate::WeightResult<VggFeatures<B>> {
    use burn::record::{FullPrecisionSettings, Recorder};
    use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

    use crate::WeightError;

    let path = path.as_ref();
    if !path.exists() {
        return Err(WeightError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let args = torchvision_key_remaps(&variant)
        .into_iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        });

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| WeightError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    tracing::info!(path = %path.display(), ?variant, "loaded torchvision VGG16 weights");

    Ok(VggConfig::new()
        .with_variant(variant)
        .init::<B>(device)
        .load_record(record))
}
