//! Additional operations for the Burn deep learning framework
//!
//! Burn ships max pooling that reports the selected positions, but nothing that
//! consumes them again. This crate adds the inverse (`max_unpool2d`) together with
//! the small resize helper used by concatenating decoders.

mod pooling;
mod resize;

// Convenient re-exports
#[doc(inline)]
pub use pooling::{max_pool2d, max_pool2d_with_indices, max_unpool2d, PoolIndices};
#[doc(inline)]
pub use resize::resize_nearest;

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    pub type TestBackend = NdArray;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
