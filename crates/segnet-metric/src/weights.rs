use burn::prelude::*;

/// Per-class pixel statistics of a labelled dataset.
///
/// For every class it keeps the number of pixels of that class and the total
/// number of pixels of the images in which the class appears at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHistogram {
    pixels: Vec<u64>,
    image_pixels: Vec<u64>,
}

impl ClassHistogram {
    pub fn new(num_classes: usize) -> Self {
        Self {
            pixels: vec![0; num_classes],
            image_pixels: vec![0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.pixels.len()
    }

    /// Pixels counted for `class`.
    pub fn pixels(&self, class: usize) -> u64 {
        self.pixels[class]
    }

    /// Add one label image. Labels outside `[0, num_classes)` are skipped.
    pub fn update_image(&mut self, labels: &[i64]) {
        let mut counts = vec![0u64; self.num_classes()];
        for &label in labels {
            let class = usize::try_from(label).ok();
            if let Some(count) = class.and_then(|class| counts.get_mut(class)) {
                *count += 1;
            }
        }

        let size = labels.len() as u64;
        for (class, count) in counts.into_iter().enumerate() {
            if count > 0 {
                self.pixels[class] += count;
                self.image_pixels[class] += size;
            }
        }
    }

    /// Add every image of a `[batch, height, width]` label tensor.
    pub fn update_tensor<B: Backend>(&mut self, labels: Tensor<B, 3, Int>) {
        let [batch, height, width] = labels.dims();
        let labels: Vec<i64> = labels.into_data().iter::<i64>().collect();
        let plane = height * width;

        for image in 0..batch {
            self.update_image(&labels[image * plane..(image + 1) * plane]);
        }
    }
}

/// Median frequency balancing weights.
///
/// The frequency of a class is its pixel count divided by the pixel count of the
/// images it appears in; the weight is the median frequency over present classes
/// divided by the class frequency. Classes that never appear get weight 0.
pub fn median_frequency_weights(histogram: &ClassHistogram) -> Vec<f32> {
    let frequencies: Vec<Option<f64>> = histogram
        .pixels
        .iter()
        .zip(&histogram.image_pixels)
        .map(|(&pixels, &image_pixels)| {
            (pixels > 0).then(|| pixels as f64 / image_pixels as f64)
        })
        .collect();

    let mut present: Vec<f64> = frequencies.iter().flatten().copied().collect();
    if present.is_empty() {
        return vec![0.0; frequencies.len()];
    }
    present.sort_by(f64::total_cmp);
    let middle = present.len() / 2;
    let median = if present.len() % 2 == 0 {
        (present[middle - 1] + present[middle]) / 2.0
    } else {
        present[middle]
    };

    frequencies
        .into_iter()
        .map(|frequency| frequency.map_or(0.0, |frequency| (median / frequency) as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn histogram_tracks_images_containing_each_class() {
        let mut histogram = ClassHistogram::new(3);
        histogram.update_image(&[0, 0, 0, 1]);
        histogram.update_image(&[0, 0, 255, 0]);

        assert_eq!(histogram.pixels(0), 6);
        assert_eq!(histogram.pixels(1), 1);
        assert_eq!(histogram.pixels(2), 0);
        assert_eq!(histogram.image_pixels, vec![8, 4, 0]);
    }

    #[test]
    fn weights_balance_rare_classes_up() {
        let mut histogram = ClassHistogram::new(3);
        histogram.update_image(&[0, 0, 0, 1]);
        histogram.update_image(&[0, 0, 0, 0]);

        let weights = median_frequency_weights(&histogram);

        // frequencies: 7/8 and 1/4, median 9/16
        assert!((weights[0] - (9.0 / 16.0) / (7.0 / 8.0)).abs() < 1e-6);
        assert!((weights[1] - (9.0 / 16.0) / 0.25).abs() < 1e-6);
        assert_eq!(weights[2], 0.0);
        assert!(weights[1] > weights[0]);
    }

    #[test]
    fn empty_histogram_gives_zero_weights() {
        assert_eq!(
            median_frequency_weights(&ClassHistogram::new(2)),
            vec![0.0, 0.0]
        );
    }

    #[test]
    fn tensor_update_splits_images() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::new(vec![0i64, 0, 1, 1, 0, 0, 0, 0], [2, 2, 2]),
            &device,
        );

        let mut histogram = ClassHistogram::new(2);
        histogram.update_tensor(labels);

        assert_eq!(histogram.pixels(0), 6);
        assert_eq!(histogram.pixels(1), 2);
        assert_eq!(histogram.image_pixels, vec![8, 4]);
    }
}
