use burn::prelude::*;
use segnet_extra_ops::{max_pool2d, max_pool2d_with_indices, PoolIndices};

use super::block::{BlockStack, BlockStackConfig, Transition};

/// Configuration of an [`EncoderBlock`].
#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Number of blocks before the pooling step.
    pub repeat: usize,
    /// Kernel size of every block.
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl EncoderBlockConfig {
    /// Initialize a new encoder block. The first block changes the channel count.
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let blocks = BlockStackConfig::new(self.in_channels, self.out_channels, self.repeat)
            .with_kernel_size(self.kernel_size)
            .init_with(Transition::Leading, device);

        EncoderBlock { blocks }
    }
}

/// `repeat` blocks followed by 2x2 max pooling.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub blocks: BlockStack<B>,
}

impl<B: Backend> EncoderBlock<B> {
    /// Run the blocks and pool, keeping what the paired decoder needs to unpool.
    ///
    /// # Shapes
    ///   - input: `[batch, in_channels, height, width]`
    ///   - output: `[batch, out_channels, height / 2, width / 2]`
    ///   - indices: same shape as the output, with the pre-pool `[height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, PoolIndices<B>) {
        max_pool2d_with_indices(self.blocks.forward(x))
    }

    /// Run the blocks and pool, keeping the pre-pool features instead of indices.
    ///
    /// Used by concatenating (U-Net style) skips.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let features = self.blocks.forward(x);
        (max_pool2d(features.clone()), features)
    }
}
