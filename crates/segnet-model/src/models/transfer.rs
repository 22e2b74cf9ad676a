//! Seeding encoder convolutions from a pretrained weight bank.

use burn::{module::Param, nn::conv::Conv2d, prelude::*};
use segnet_backbones::WeightBank;
use tracing::info;

use super::network::SegmentationNetwork;
use crate::error::{SegNetError, SegNetResult};

fn shape_string(dims: Option<Vec<usize>>) -> String {
    dims.map_or_else(|| "no bias".to_string(), |dims| format!("{dims:?}"))
}

fn check_pair<B: Backend>(
    index: usize,
    target: &Conv2d<B>,
    source: &Conv2d<B>,
) -> SegNetResult<()> {
    let (expected, actual) = (target.weight.dims(), source.weight.dims());
    if expected != actual {
        return Err(SegNetError::WeightTransferShape {
            index,
            parameter: "weight",
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        });
    }

    let expected = target.bias.as_ref().map(|bias| bias.dims().to_vec());
    let actual = source.bias.as_ref().map(|bias| bias.dims().to_vec());
    if expected != actual {
        return Err(SegNetError::WeightTransferShape {
            index,
            parameter: "bias",
            expected: shape_string(expected),
            actual: shape_string(actual),
        });
    }

    Ok(())
}

fn copy_conv<B: Backend>(target: &mut Conv2d<B>, source: &Conv2d<B>) {
    let device = target.weight.device();

    target.weight = Param::from_tensor(source.weight.val().to_device(&device));
    target.bias = source
        .bias
        .as_ref()
        .map(|bias| Param::from_tensor(bias.val().to_device(&device)));
}

impl<B: Backend> SegmentationNetwork<B> {
    /// Copy the weight bank's convolutions into every tower's encoder.
    ///
    /// Encoder convolutions are enumerated stage by stage, then block by block, and
    /// paired positionally with [`WeightBank::conv_layers`]. Every pair of every
    /// tower is checked before anything is copied, so on error the network is
    /// dropped untouched.
    ///
    /// # Errors
    ///
    /// - `SegNetError::WeightTransferLength` if a tower's encoder and the bank hold
    ///   a different number of convolutions.
    /// - `SegNetError::WeightTransferShape` if any pair disagrees on the weight or
    ///   bias shape.
    pub fn init_encoder<W>(mut self, bank: &W) -> SegNetResult<Self>
    where
        W: WeightBank<B> + ?Sized,
    {
        let sources = bank.conv_layers();

        for tower in &self.towers {
            let targets = tower.encoder_conv_layers();
            if targets.len() != sources.len() {
                return Err(SegNetError::WeightTransferLength {
                    expected: targets.len(),
                    actual: sources.len(),
                });
            }
            for (index, (target, source)) in targets.iter().zip(&sources).enumerate() {
                check_pair(index, target, source)?;
            }
        }

        for (index, tower) in self.towers.iter_mut().enumerate() {
            let targets = tower.encoder_conv_layers_mut();
            let copied = targets.len();
            for (target, source) in targets.into_iter().zip(&sources) {
                copy_conv(target, source);
            }
            info!(tower = index, convolutions = copied, "initialized encoder from weight bank");
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use burn::nn::conv::Conv2dConfig;
    use segnet_backbones::{VggConfig, VggVariant};

    use super::*;
    use crate::{
        config::{Architecture, NetworkConfig, StageConfig, TowerConfig},
        tests::TestBackend,
    };

    fn tiny() -> NetworkConfig {
        NetworkConfig::new(
            vec![TowerConfig::new(
                3,
                vec![
                    StageConfig::encoder("enc1", 3, 4, 2),
                    StageConfig::encoder("enc2", 4, 8, 1),
                    StageConfig::decoder("enc2", 8, 4, 1),
                    StageConfig::decoder("enc1", 4, 2, 2),
                ],
            )],
            2,
        )
    }

    fn bank(shapes: &[[usize; 2]]) -> Vec<Conv2d<TestBackend>> {
        let device = Default::default();
        shapes
            .iter()
            .map(|channels| Conv2dConfig::new(*channels, [3, 3]).init(&device))
            .collect()
    }

    #[test]
    fn matching_bank_is_copied_pairwise() {
        let device = Default::default();
        let network = tiny().init::<TestBackend>(&device).unwrap();
        let bank = bank(&[[3, 4], [4, 4], [4, 8]]);

        let network = network.init_encoder(&bank).unwrap();

        for (target, source) in network.towers[0].encoder_conv_layers().iter().zip(&bank) {
            target
                .weight
                .val()
                .into_data()
                .assert_eq(&source.weight.val().into_data(), true);
            target
                .bias
                .as_ref()
                .unwrap()
                .val()
                .into_data()
                .assert_eq(&source.bias.as_ref().unwrap().val().into_data(), true);
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let device = Default::default();
        let network = tiny().init::<TestBackend>(&device).unwrap();

        let result = network.init_encoder(&bank(&[[3, 4], [4, 4]]));

        assert!(matches!(
            result,
            Err(SegNetError::WeightTransferLength {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let device = Default::default();
        let network = tiny().init::<TestBackend>(&device).unwrap();

        let result = network.init_encoder(&bank(&[[3, 4], [4, 4], [4, 16]]));

        assert!(matches!(
            result,
            Err(SegNetError::WeightTransferShape {
                index: 2,
                parameter: "weight",
                ..
            })
        ));
    }

    #[test]
    fn missing_bias_is_a_shape_mismatch() {
        let device = Default::default();
        let network = tiny().init::<TestBackend>(&device).unwrap();
        let bank: Vec<Conv2d<TestBackend>> = [[3, 4], [4, 4], [4, 8]]
            .iter()
            .map(|channels| {
                Conv2dConfig::new(*channels, [3, 3])
                    .with_bias(false)
                    .init(&device)
            })
            .collect();

        let result = network.init_encoder(&bank);

        assert!(matches!(
            result,
            Err(SegNetError::WeightTransferShape {
                index: 0,
                parameter: "bias",
                ..
            })
        ));
    }

    #[test]
    fn segnet_accepts_vgg16_in_both_towers() {
        let device = Default::default();
        let vgg = VggConfig::new()
            .with_variant(VggVariant::Vgg16)
            .init::<TestBackend>(&device);
        let network = Architecture::MultiSegNet(3)
            .config(3, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        let network = network.init_encoder(&vgg).unwrap();

        let last = network.towers[1].encoder_conv_layers()[12];
        last.weight
            .val()
            .into_data()
            .assert_eq(&vgg.convs[12].conv.weight.val().into_data(), true);
    }

    #[test]
    fn unet_encoder_does_not_fit_vgg16() {
        let device = Default::default();
        let vgg = VggConfig::new().init::<TestBackend>(&device);
        let network = Architecture::UNet
            .config(3, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(matches!(
            network.init_encoder(&vgg),
            Err(SegNetError::WeightTransferLength { expected: 8, actual: 13 })
        ));
    }
}
