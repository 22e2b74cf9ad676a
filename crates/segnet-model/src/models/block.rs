//! Convolution, batch normalization and ReLU as one unit.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Configuration of a [`Block`].
#[derive(Config, Debug)]
pub struct BlockConfig {
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Square kernel size. Must be odd so that padding keeps the spatial size.
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl BlockConfig {
    /// Initialize a new block.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Block<B> {
        let padding = self.kernel_size / 2;
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_initializer(initializer)
        .init(device);

        Block {
            conv,
            norm: BatchNormConfig::new(self.out_channels).init(device),
            activation: Relu::new(),
        }
    }
}

/// Convolution, batch normalization, ReLU.
///
/// The spatial size is preserved; only the channel count changes.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> Block<B> {
    /// # Shapes
    ///   - input: `[batch, in_channels, height, width]`
    ///   - output: `[batch, out_channels, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// Where a [`BlockStack`] changes its channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The first block maps `in -> out`, the rest keep `out`.
    Leading,
    /// The leading blocks keep `in`, the last one maps `in -> out`.
    Trailing,
}

/// Configuration of a [`BlockStack`].
#[derive(Config, Debug)]
pub struct BlockStackConfig {
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Number of blocks.
    pub repeat: usize,
    /// Kernel size of every block.
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl BlockStackConfig {
    /// Initialize a stack whose first block changes the channel count.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BlockStack<B> {
        self.init_with(Transition::Leading, device)
    }

    pub(crate) fn init_with<B: Backend>(
        &self,
        transition: Transition,
        device: &B::Device,
    ) -> BlockStack<B> {
        let blocks = (0..self.repeat)
            .map(|position| {
                let changes = match transition {
                    Transition::Leading => position == 0,
                    Transition::Trailing => position + 1 == self.repeat,
                };
                let (in_channels, out_channels) = match (transition, changes) {
                    (_, true) => (self.in_channels, self.out_channels),
                    (Transition::Leading, false) => (self.out_channels, self.out_channels),
                    (Transition::Trailing, false) => (self.in_channels, self.in_channels),
                };
                BlockConfig::new(in_channels, out_channels)
                    .with_kernel_size(self.kernel_size)
                    .init(device)
            })
            .collect();

        BlockStack { blocks }
    }
}

/// A chain of [`Block`]s.
#[derive(Module, Debug)]
pub struct BlockStack<B: Backend> {
    pub blocks: Vec<Block<B>>,
}

impl<B: Backend> BlockStack<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    /// Convolutions in forward order.
    pub fn conv_layers(&self) -> impl Iterator<Item = &Conv2d<B>> {
        self.blocks.iter().map(|block| &block.conv)
    }

    pub(crate) fn conv_layers_mut(&mut self) -> impl Iterator<Item = &mut Conv2d<B>> {
        self.blocks.iter_mut().map(|block| &mut block.conv)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn block_keeps_spatial_size() {
        let device = Default::default();
        let block = BlockConfig::new(3, 8).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 7, 5], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 8, 7, 5]);
    }

    #[test]
    fn block_output_is_non_negative() {
        let device = Default::default();
        let block = BlockConfig::new(2, 4).init::<TestBackend>(&device);
        let x =
            Tensor::<TestBackend, 4>::random([1, 2, 4, 4], Distribution::Normal(0.0, 1.0), &device);

        let min = block.forward(x).min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn one_by_one_kernel_uses_no_padding() {
        let device = Default::default();
        let block = BlockConfig::new(4, 2)
            .with_kernel_size(1)
            .init::<TestBackend>(&device);

        assert_eq!(block.conv.weight.dims(), [2, 4, 1, 1]);
    }

    #[test]
    fn leading_stack_widens_at_first_block() {
        let device = Default::default();
        let stack = BlockStackConfig::new(3, 16, 3).init::<TestBackend>(&device);

        let shapes: Vec<[usize; 4]> = stack.conv_layers().map(|conv| conv.weight.dims()).collect();
        assert_eq!(
            shapes,
            vec![[16, 3, 3, 3], [16, 16, 3, 3], [16, 16, 3, 3]]
        );
    }

    #[test]
    fn trailing_stack_narrows_at_last_block() {
        let device = Default::default();
        let stack = BlockStackConfig::new(16, 4, 2)
            .init_with::<TestBackend>(Transition::Trailing, &device);

        let shapes: Vec<[usize; 4]> = stack.conv_layers().map(|conv| conv.weight.dims()).collect();
        assert_eq!(shapes, vec![[16, 16, 3, 3], [4, 16, 3, 3]]);
    }
}
