//! # Index-recording max pooling
//!
//! SegNet style decoders upsample by writing each value back to the position the
//! encoder's max pooling picked it from. `max_pool2d_with_indices` keeps those
//! positions (and the exact pre-pool size, since odd sizes are floored) in a
//! [`PoolIndices`], and `max_unpool2d` consumes it.
//!
//! Pooling always uses a 2x2 window with stride 2 and no padding. Within a window,
//! ties go to the first maximum in row-major order: the comparison is strictly
//! greater-than, so a later equal value never replaces an earlier one.

use burn::{prelude::*, tensor::module};

const KERNEL: [usize; 2] = [2, 2];
const STRIDE: [usize; 2] = [2, 2];
const PADDING: [usize; 2] = [0, 0];
const DILATION: [usize; 2] = [1, 1];

/// Positions selected by one 2x2 max pooling step.
///
/// Produced by an encoder, read by the decoder at the mirrored depth, and dropped at
/// the end of the forward pass.
#[derive(Debug, Clone)]
pub struct PoolIndices<B: Backend> {
    /// Flat `row * width + col` offsets into each pre-pool plane.
    ///
    /// Shape `[batch, channels, height / 2, width / 2]`.
    pub indices: Tensor<B, 4, Int>,
    /// Spatial `[height, width]` of the tensor before pooling.
    pub shape: [usize; 2],
}

impl<B: Backend> PoolIndices<B> {
    /// Dimensions of the index map.
    pub fn dims(&self) -> [usize; 4] {
        self.indices.dims()
    }
}

/// 2x2 max pooling that also returns the selected positions.
///
/// # Shapes
///   - input: `[batch, channels, height, width]`
///   - output: `[batch, channels, height / 2, width / 2]`
pub fn max_pool2d_with_indices<B: Backend>(x: Tensor<B, 4>) -> (Tensor<B, 4>, PoolIndices<B>) {
    let [_, _, height, width] = x.dims();
    let (pooled, indices) = module::max_pool2d_with_indices(x, KERNEL, STRIDE, PADDING, DILATION);

    (
        pooled,
        PoolIndices {
            indices,
            shape: [height, width],
        },
    )
}

/// 2x2 max pooling without index bookkeeping.
pub fn max_pool2d<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    module::max_pool2d(x, KERNEL, STRIDE, PADDING, DILATION)
}

/// Inverse of [`max_pool2d_with_indices`].
///
/// Returns a tensor of the recorded pre-pool size that is zero everywhere except at
/// the recorded positions, which receive the corresponding input values.
///
/// # Panics
///
/// Panics if the index map's dimensions differ from the input's. Such a pair comes
/// from a different depth of the network and would scatter values to the wrong
/// pixels.
pub fn max_unpool2d<B: Backend>(x: Tensor<B, 4>, pool: &PoolIndices<B>) -> Tensor<B, 4> {
    let dims = x.dims();
    let [batch, channels, height, width] = dims;
    assert_eq!(
        pool.dims(),
        dims,
        "index map {:?} does not match unpool input {:?}",
        pool.dims(),
        dims
    );

    let [out_height, out_width] = pool.shape;
    let plane = height * width;
    let device = x.device();

    let values = x.reshape([batch, channels, plane]);
    let indices = pool.indices.clone().reshape([batch, channels, plane]);

    // Windows never overlap (stride == kernel), so every target offset is hit at
    // most once and the additive scatter is a plain assignment.
    Tensor::<B, 3>::zeros([batch, channels, out_height * out_width], &device)
        .scatter(2, indices, values)
        .reshape([batch, channels, out_height, out_width])
}
