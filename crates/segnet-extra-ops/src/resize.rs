use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// Nearest-neighbour resize of a `[batch, channels, height, width]` tensor.
///
/// Returns the input untouched when it already has the requested size.
pub fn resize_nearest<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }

    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, Tensor};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn same_size_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 2, 6, 4], Distribution::Default, &device);

        let y = resize_nearest(x.clone(), [6, 4]);

        y.into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn upsamples_odd_target() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 2, 3], Distribution::Default, &device);

        let y = resize_nearest(x, [5, 7]);

        assert_eq!(y.dims(), [2, 3, 5, 7]);
    }
}
