//! Named architectures.

use burn::prelude::*;

use super::{
    network::{NetworkConfig, TowerConfig},
    stage::StageConfig,
};
use crate::models::BlockConfig;

/// The named architectures.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// SegNet: five index-recording encoders over the VGG16 layout, mirrored
    /// decoders.
    SegNet,
    /// SegNet with a sixth level and 1024-channel bottom encoders.
    SegNetDeep,
    /// UpNet: five levels ending at 1024 channels, dropout at the bottleneck.
    UpNet,
    /// U-Net: concatenating skips, a bridge at the bottom and a 1x1 head.
    UNet,
    /// Two SegNet towers, the second reading the given number of channels, fused
    /// by one more block.
    MultiSegNet(usize),
}

impl Architecture {
    /// Network description for `in_channels` input channels and `num_classes`
    /// classes. For [`Architecture::MultiSegNet`], `in_channels` is the first
    /// modality only.
    pub fn config(&self, in_channels: usize, num_classes: usize) -> NetworkConfig {
        match self {
            Self::SegNet => NetworkConfig::new(vec![segnet(in_channels, num_classes)], num_classes),
            Self::SegNetDeep => NetworkConfig::new(
                vec![TowerConfig::new(
                    in_channels,
                    vec![
                        StageConfig::encoder("enc1", in_channels, 64, 2),
                        StageConfig::encoder("enc2", 64, 128, 2),
                        StageConfig::encoder("enc3", 128, 256, 3),
                        StageConfig::encoder("enc4", 256, 512, 3),
                        StageConfig::encoder("enc5", 512, 1024, 3),
                        StageConfig::encoder("enc6", 1024, 1024, 3),
                        StageConfig::decoder("enc6", 1024, 1024, 3),
                        StageConfig::decoder("enc5", 1024, 512, 3),
                        StageConfig::decoder("enc4", 512, 256, 3),
                        StageConfig::decoder("enc3", 256, 128, 3),
                        StageConfig::decoder("enc2", 128, 64, 2),
                        StageConfig::decoder("enc1", 64, num_classes, 2),
                    ],
                )],
                num_classes,
            ),
            Self::UpNet => NetworkConfig::new(
                vec![TowerConfig::new(
                    in_channels,
                    vec![
                        StageConfig::encoder("enc1", in_channels, 64, 2),
                        StageConfig::encoder("enc2", 64, 128, 2),
                        StageConfig::encoder("enc3", 128, 256, 3),
                        StageConfig::encoder("enc4", 256, 512, 3),
                        StageConfig::encoder("enc5", 512, 1024, 3),
                        StageConfig::Dropout(0.5),
                        StageConfig::decoder("enc5", 1024, 512, 3),
                        StageConfig::decoder("enc4", 512, 256, 3),
                        StageConfig::decoder("enc3", 256, 128, 3),
                        StageConfig::decoder("enc2", 128, 64, 2),
                        StageConfig::decoder("enc1", 64, num_classes, 2),
                    ],
                )],
                num_classes,
            ),
            Self::UNet => NetworkConfig::new(
                vec![TowerConfig::new(
                    in_channels,
                    vec![
                        StageConfig::concat_encoder("enc1", in_channels, 64, 2),
                        StageConfig::concat_encoder("enc2", 64, 128, 2),
                        StageConfig::concat_encoder("enc3", 128, 256, 2),
                        StageConfig::concat_encoder("enc4", 256, 512, 2),
                        StageConfig::bridge(512, 512, 2),
                        StageConfig::concat_decoder("enc4", 1024, 256, 2),
                        StageConfig::concat_decoder("enc3", 512, 128, 2),
                        StageConfig::concat_decoder("enc2", 256, 64, 2),
                        StageConfig::concat_decoder("enc1", 128, 64, 2),
                        StageConfig::fuse(64, num_classes, 1),
                    ],
                )],
                num_classes,
            ),
            Self::MultiSegNet(second_in_channels) => NetworkConfig::new(
                vec![
                    segnet(in_channels, num_classes),
                    segnet(*second_in_channels, num_classes),
                ],
                num_classes,
            )
            .with_fuse(Some(BlockConfig::new(2 * num_classes, num_classes))),
        }
    }

    /// Input channels the network reads in total.
    pub fn total_in_channels(&self, in_channels: usize) -> usize {
        match self {
            Self::MultiSegNet(second_in_channels) => in_channels + second_in_channels,
            _ => in_channels,
        }
    }
}

fn segnet(in_channels: usize, num_classes: usize) -> TowerConfig {
    TowerConfig::new(
        in_channels,
        vec![
            StageConfig::encoder("enc1", in_channels, 64, 2),
            StageConfig::encoder("enc2", 64, 128, 2),
            StageConfig::encoder("enc3", 128, 256, 3),
            StageConfig::encoder("enc4", 256, 512, 3),
            StageConfig::encoder("enc5", 512, 512, 3),
            StageConfig::decoder("enc5", 512, 512, 3),
            StageConfig::decoder("enc4", 512, 256, 3),
            StageConfig::decoder("enc3", 256, 128, 3),
            StageConfig::decoder("enc2", 128, 64, 2),
            StageConfig::decoder("enc1", 64, num_classes, 2),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder_convs(config: &NetworkConfig) -> Vec<usize> {
        config.towers[0]
            .stages
            .iter()
            .filter_map(|stage| match stage {
                StageConfig::Encoder(encoder) => Some(encoder.block.repeat),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn segnet_encoder_mirrors_vgg16() {
        let config = Architecture::SegNet.config(3, 21);

        assert_eq!(encoder_convs(&config), vec![2, 2, 3, 3, 3]);
        assert_eq!(encoder_convs(&config).iter().sum::<usize>(), 13);
    }

    #[test]
    fn multi_segnet_reads_both_modalities() {
        let architecture = Architecture::MultiSegNet(1);
        let config = architecture.config(3, 6);

        assert_eq!(config.towers.len(), 2);
        assert_eq!(config.in_channels(), 4);
        assert_eq!(architecture.total_in_channels(3), 4);
    }

    #[test]
    fn unet_decoders_read_concatenated_channels() {
        let config = Architecture::UNet.config(3, 2);

        let decoder_inputs: Vec<usize> = config.towers[0]
            .stages
            .iter()
            .filter_map(|stage| match stage {
                StageConfig::Decoder(decoder) => Some(decoder.block.in_channels),
                _ => None,
            })
            .collect();
        assert_eq!(decoder_inputs, vec![1024, 512, 256, 128]);
    }
}
