//! Pretrained feature extractors for SegNet
//!
//! A SegNet encoder is a VGG16 feature stack with the classifier removed, so the
//! usual way to start training is to copy an ImageNet-trained VGG16's convolutions
//! into it. This crate provides that VGG16 (with or without batch normalization) and
//! the [`WeightBank`] trait through which the model crate reads the convolutions.
//!
//! Loading torchvision checkpoints requires the `pretrained` feature.

mod error;
mod vgg;

use burn::{nn::conv::Conv2d, prelude::*};

pub use error::{WeightError, WeightResult};
#[cfg(feature = "pretrained")]
pub use vgg::load_torchvision;
pub use vgg::{torchvision_key_remaps, VggConfig, VggConv, VggFeatures, VggVariant};

/// A source of pretrained convolution parameters.
///
/// Implementors list their convolutions in a stable order: the order in which an
/// input flows through them. Consumers pair them positionally with their own
/// layers, so the order must not depend on anything but the architecture.
pub trait WeightBank<B: Backend> {
    /// Convolutions in forward order.
    fn conv_layers(&self) -> Vec<&Conv2d<B>>;

    /// Number of convolutions in the bank.
    fn len(&self) -> usize {
        self.conv_layers().len()
    }

    /// Whether the bank holds no convolutions.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Backend> WeightBank<B> for [Conv2d<B>] {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        self.iter().collect()
    }
}

impl<B: Backend> WeightBank<B> for Vec<Conv2d<B>> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, nn::conv::Conv2dConfig};

    use super::*;

    pub type TestBackend = NdArray;

    #[test]
    fn slice_bank_preserves_order() {
        let device = Default::default();
        let convs: Vec<Conv2d<TestBackend>> = vec![
            Conv2dConfig::new([3, 8], [3, 3]).init(&device),
            Conv2dConfig::new([8, 16], [3, 3]).init(&device),
        ];

        let layers = convs.conv_layers();

        assert_eq!(convs.len(), 2);
        assert_eq!(layers[0].weight.dims(), [8, 3, 3, 3]);
        assert_eq!(layers[1].weight.dims(), [16, 8, 3, 3]);
    }
}
