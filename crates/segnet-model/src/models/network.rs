//! The assembled network.

use std::collections::HashMap;

use burn::{
    module::Ignored,
    nn::{conv::Conv2d, Dropout},
    prelude::*,
};
use segnet_extra_ops::PoolIndices;

use super::{
    block::{Block, BlockStack},
    decoder::DecoderBlock,
    encoder::EncoderBlock,
};
use crate::{
    config::SkipMode,
    error::{SegNetError, SegNetResult},
};

/// A network producing per-pixel class scores.
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// Unnormalized scores.
    ///
    /// # Shapes
    ///   - input: `[batch, channels, height, width]`
    ///   - output: `[batch, num_classes, height, width]`
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Number of score channels.
    fn num_classes(&self) -> usize;

    /// Channels the input must carry.
    fn in_channels(&self) -> usize;
}

/// What an encoder stage leaves for its decoder during one forward pass.
enum Capture<B: Backend> {
    Indices(PoolIndices<B>),
    Features(Tensor<B, 4>),
}

/// Captures of one forward pass, keyed by encoder tag. Each is taken exactly once.
struct CaptureArena<B: Backend> {
    entries: HashMap<String, Capture<B>>,
}

impl<B: Backend> CaptureArena<B> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn put(&mut self, tag: &str, capture: Capture<B>) {
        self.entries.insert(tag.to_string(), capture);
    }

    fn take(&mut self, tag: &str) -> Option<Capture<B>> {
        self.entries.remove(tag)
    }
}

/// Encoder block plus the tag its capture is stored under.
#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    pub block: EncoderBlock<B>,
    pub(crate) tag: Ignored<String>,
    pub(crate) skip: Ignored<SkipMode>,
}

impl<B: Backend> EncoderStage<B> {
    fn forward(&self, x: Tensor<B, 4>, captures: &mut CaptureArena<B>) -> Tensor<B, 4> {
        match *self.skip {
            SkipMode::Indices => {
                let (x, indices) = self.block.forward(x);
                captures.put(&self.tag, Capture::Indices(indices));
                x
            }
            SkipMode::Concat => {
                let (x, features) = self.block.forward_features(x);
                captures.put(&self.tag, Capture::Features(features));
                x
            }
        }
    }

    /// Tag under which this stage's capture is stored.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Decoder block plus the tag of the capture it consumes.
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    pub block: DecoderBlock<B>,
    pub(crate) source: Ignored<String>,
    pub(crate) skip: Ignored<SkipMode>,
}

impl<B: Backend> DecoderStage<B> {
    fn forward(&self, x: Tensor<B, 4>, captures: &mut CaptureArena<B>) -> Tensor<B, 4> {
        match (captures.take(&self.source), &*self.skip) {
            (Some(Capture::Indices(indices)), SkipMode::Indices) => self.block.forward(x, &indices),
            (Some(Capture::Features(skip)), SkipMode::Concat) => self.block.forward_concat(x, skip),
            _ => panic!(
                "decoder stage found no {:?} capture under '{}'",
                *self.skip, *self.source
            ),
        }
    }

    /// Tag of the consumed capture.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One step of a tower.
#[derive(Module, Debug)]
pub enum Stage<B: Backend> {
    Encoder(EncoderStage<B>),
    Decoder(DecoderStage<B>),
    Bridge(BlockStack<B>),
    Dropout(Dropout),
    Fuse(Block<B>),
}

/// One encoder-decoder chain.
#[derive(Module, Debug)]
pub struct Tower<B: Backend> {
    pub stages: Vec<Stage<B>>,
    pub in_channels: usize,
}

impl<B: Backend> Tower<B> {
    /// Run every stage in order.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut captures = CaptureArena::new();

        self.stages.iter().fold(input, |x, stage| match stage {
            Stage::Encoder(stage) => stage.forward(x, &mut captures),
            Stage::Decoder(stage) => stage.forward(x, &mut captures),
            Stage::Bridge(blocks) => blocks.forward(x),
            Stage::Dropout(dropout) => dropout.forward(x),
            Stage::Fuse(block) => block.forward(x),
        })
    }

    /// Encoder convolutions, stage by stage then block by block.
    pub fn encoder_conv_layers(&self) -> Vec<&Conv2d<B>> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                Stage::Encoder(stage) => Some(stage.block.blocks.conv_layers()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn encoder_conv_layers_mut(&mut self) -> Vec<&mut Conv2d<B>> {
        self.stages
            .iter_mut()
            .filter_map(|stage| match stage {
                Stage::Encoder(stage) => Some(stage.block.blocks.conv_layers_mut()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// A network of one or more towers.
///
/// With several towers the input channels are split in tower order, each tower
/// scores its slice, and the concatenated scores go through the fuse block.
#[derive(Module, Debug)]
pub struct SegmentationNetwork<B: Backend> {
    pub towers: Vec<Tower<B>>,
    pub fuse: Option<Block<B>>,
    num_classes: usize,
}

impl<B: Backend> SegmentationNetwork<B> {
    pub(crate) fn new(towers: Vec<Tower<B>>, fuse: Option<Block<B>>, num_classes: usize) -> Self {
        Self {
            towers,
            fuse,
            num_classes,
        }
    }

    /// Input channels over all towers.
    pub fn in_channels(&self) -> usize {
        self.towers.iter().map(|tower| tower.in_channels).sum()
    }

    /// Score a channel-stacked input.
    ///
    /// # Panics
    ///
    /// Panics if the input's channel count differs from [`Self::in_channels`].
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = input.dims();
        assert_eq!(
            channels,
            self.in_channels(),
            "network reads {} input channels, got {channels}",
            self.in_channels()
        );

        if let [tower] = self.towers.as_slice() {
            return tower.forward(input);
        }

        let mut offset = 0;
        let inputs = self
            .towers
            .iter()
            .map(|tower| {
                let slice = input.clone().narrow(1, offset, tower.in_channels);
                offset += tower.in_channels;
                slice
            })
            .collect();

        self.fuse_towers(inputs)
    }

    /// Score one input per tower.
    ///
    /// # Errors
    ///
    /// Returns `SegNetError::InvalidTensorShape` if the number of inputs or any
    /// input's channel count does not match its tower.
    pub fn forward_modalities(&self, inputs: Vec<Tensor<B, 4>>) -> SegNetResult<Tensor<B, 4>> {
        if inputs.len() != self.towers.len() {
            return Err(SegNetError::InvalidTensorShape {
                expected: format!("{} inputs", self.towers.len()),
                actual: format!("{} inputs", inputs.len()),
            });
        }
        for (tower, input) in self.towers.iter().zip(&inputs) {
            let [_, channels, _, _] = input.dims();
            if channels != tower.in_channels {
                return Err(SegNetError::InvalidTensorShape {
                    expected: format!("{} channels", tower.in_channels),
                    actual: format!("{:?}", input.dims()),
                });
            }
        }

        Ok(self.fuse_towers(inputs))
    }

    fn fuse_towers(&self, inputs: Vec<Tensor<B, 4>>) -> Tensor<B, 4> {
        let scores: Vec<Tensor<B, 4>> = self
            .towers
            .iter()
            .zip(inputs)
            .map(|(tower, input)| tower.forward(input))
            .collect();

        match &self.fuse {
            Some(fuse) => fuse.forward(Tensor::cat(scores, 1)),
            None => Tensor::cat(scores, 1),
        }
    }
}

impl<B: Backend> SegmentationModel<B> for SegmentationNetwork<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::forward(self, input)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn in_channels(&self) -> usize {
        Self::in_channels(self)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::{
        config::{Architecture, NetworkConfig, StageConfig, TowerConfig},
        tests::{TestAutodiffBackend, TestBackend},
    };

    fn tiny(in_channels: usize, num_classes: usize) -> TowerConfig {
        TowerConfig::new(
            in_channels,
            vec![
                StageConfig::encoder("enc1", in_channels, 4, 1),
                StageConfig::encoder("enc2", 4, 8, 2),
                StageConfig::decoder("enc2", 8, 4, 2),
                StageConfig::decoder("enc1", 4, num_classes, 1),
            ],
        )
    }

    #[test]
    fn output_has_one_channel_per_class_for_any_size() {
        let device = Default::default();
        for num_classes in [1, 2, 5] {
            let network = NetworkConfig::new(vec![tiny(3, num_classes)], num_classes)
                .init::<TestBackend>(&device)
                .unwrap();

            for [height, width] in [[8, 8], [12, 4], [16, 20]] {
                let x = Tensor::<TestBackend, 4>::random(
                    [2, 3, height, width],
                    Distribution::Default,
                    &device,
                );
                assert_eq!(network.forward(x).dims(), [2, num_classes, height, width]);
            }
        }
    }

    #[test]
    fn odd_sizes_are_restored_through_indices() {
        let device = Default::default();
        let network = NetworkConfig::new(vec![tiny(1, 3)], 3)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 1, 13, 9], Distribution::Default, &device);

        assert_eq!(network.forward(x).dims(), [1, 3, 13, 9]);
    }

    #[test]
    fn concat_tower_keeps_input_size() {
        let device = Default::default();
        let tower = TowerConfig::new(
            2,
            vec![
                StageConfig::concat_encoder("a", 2, 4, 1),
                StageConfig::concat_encoder("b", 4, 8, 1),
                StageConfig::bridge(8, 8, 1),
                StageConfig::concat_decoder("b", 16, 4, 1),
                StageConfig::concat_decoder("a", 8, 4, 1),
                StageConfig::fuse(4, 3, 1),
            ],
        );
        let network = NetworkConfig::new(vec![tower], 3)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 2, 10, 7], Distribution::Default, &device);

        assert_eq!(network.forward(x).dims(), [1, 3, 10, 7]);
    }

    #[test]
    fn dual_tower_splits_stacked_input_and_fuses() {
        let device = Default::default();
        let network = NetworkConfig::new(vec![tiny(3, 2), tiny(1, 2)], 2)
            .with_fuse(Some(crate::models::BlockConfig::new(4, 2)))
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([2, 4, 8, 8], Distribution::Default, &device);

        assert_eq!(network.in_channels(), 4);
        assert_eq!(network.forward(x.clone()).dims(), [2, 2, 8, 8]);

        let split = network
            .forward_modalities(vec![x.clone().narrow(1, 0, 3), x.narrow(1, 3, 1)])
            .unwrap();
        assert_eq!(split.dims(), [2, 2, 8, 8]);
    }

    #[test]
    fn modalities_are_checked_against_towers() {
        let device = Default::default();
        let network = NetworkConfig::new(vec![tiny(3, 2), tiny(1, 2)], 2)
            .with_fuse(Some(crate::models::BlockConfig::new(4, 2)))
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 3, 8, 8], Distribution::Default, &device);

        assert!(matches!(
            network.forward_modalities(vec![x.clone()]),
            Err(SegNetError::InvalidTensorShape { .. })
        ));
        assert!(matches!(
            network.forward_modalities(vec![x.clone(), x]),
            Err(SegNetError::InvalidTensorShape { .. })
        ));
    }

    #[test]
    fn invalid_config_builds_nothing() {
        let device = Default::default();
        let result = NetworkConfig::new(vec![tiny(3, 2)], 4).init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(SegNetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn dropout_is_inactive_without_autodiff() {
        let device = Default::default();
        let config = NetworkConfig::new(
            vec![TowerConfig::new(
                1,
                vec![
                    StageConfig::encoder("enc1", 1, 2, 1),
                    StageConfig::Dropout(0.5),
                    StageConfig::decoder("enc1", 2, 2, 1),
                ],
            )],
            2,
        );
        let network = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::random([1, 1, 4, 4], Distribution::Default, &device);

        let first = network.forward(x.clone());
        let second = network.forward(x);
        first.into_data().assert_eq(&second.into_data(), true);
    }

    #[test]
    fn gradients_reach_the_first_encoder() {
        let device = Default::default();
        let network = NetworkConfig::new(vec![tiny(3, 2)], 2)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let x = Tensor::<TestAutodiffBackend, 4>::random(
            [2, 3, 8, 8],
            Distribution::Default,
            &device,
        );

        let grads = network.forward(x).sum().backward();
        let first = network.towers[0].encoder_conv_layers()[0];

        assert!(first.weight.grad(&grads).is_some());
    }

    #[test]
    fn segnet_preset_builds_and_lists_thirteen_encoder_convs() {
        let device = Default::default();
        let network = Architecture::SegNet
            .config(3, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(network.towers[0].encoder_conv_layers().len(), 13);
        assert_eq!(SegmentationModel::num_classes(&network), 2);
    }
}
