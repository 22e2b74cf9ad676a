use burn::prelude::*;
use segnet_extra_ops::{max_unpool2d, resize_nearest, PoolIndices};

use super::block::{BlockStack, BlockStackConfig, Transition};

/// Configuration of a [`DecoderBlock`].
#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    /// Input channels of the blocks. For concatenating decoders this counts the
    /// skip features as well.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Number of blocks after the upsampling step.
    pub repeat: usize,
    /// Kernel size of every block.
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl DecoderBlockConfig {
    /// Initialize a new decoder block. The last block changes the channel count,
    /// mirroring the encoder.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let blocks = BlockStackConfig::new(self.in_channels, self.out_channels, self.repeat)
            .with_kernel_size(self.kernel_size)
            .init_with(Transition::Trailing, device);

        DecoderBlock { blocks }
    }
}

/// Upsampling followed by `repeat` blocks.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub blocks: BlockStack<B>,
}

impl<B: Backend> DecoderBlock<B> {
    /// Unpool with the paired encoder's indices, then refine.
    ///
    /// The output has exactly the spatial size recorded in `indices`.
    ///
    /// # Panics
    ///
    /// Panics if `indices` was recorded at a different depth than `x`.
    pub fn forward(&self, x: Tensor<B, 4>, indices: &PoolIndices<B>) -> Tensor<B, 4> {
        self.blocks.forward(max_unpool2d(x, indices))
    }

    /// Resize to the skip features' size, concatenate `[skip, x]` on channels,
    /// then refine.
    pub fn forward_concat(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = skip.dims();
        let x = resize_nearest(x, [height, width]);

        self.blocks.forward(Tensor::cat(vec![skip, x], 1))
    }
}
