use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Counts of `(truth, prediction)` pixel pairs.
///
/// Updates only add counts, so the matrix after a sequence of updates depends on
/// the multiset of pairs alone, not on how they were split into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Empty matrix over `num_classes` classes.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn class(&self, label: i64) -> Option<usize> {
        usize::try_from(label)
            .ok()
            .filter(|&class| class < self.num_classes)
    }

    /// Add `(truth, prediction)` pairs.
    ///
    /// Pairs with a label outside `[0, num_classes)` on either side are skipped;
    /// this is how void or ignored pixels stay out of the scores.
    pub fn update<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        for (truth, prediction) in pairs {
            if let (Some(truth), Some(prediction)) = (self.class(truth), self.class(prediction)) {
                self.counts[truth * self.num_classes + prediction] += 1;
            }
        }
    }

    /// Add element-wise pairs from two equally long label slices.
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn update_slices(&mut self, truth: &[i64], prediction: &[i64]) {
        assert_eq!(
            truth.len(),
            prediction.len(),
            "ground truth and prediction hold a different number of pixels"
        );
        self.update(truth.iter().copied().zip(prediction.iter().copied()));
    }

    /// Add every pixel of a `[batch, height, width]` label map pair.
    ///
    /// # Panics
    ///
    /// Panics if the tensors differ in shape.
    pub fn update_tensors<B: Backend>(
        &mut self,
        truth: Tensor<B, 3, Int>,
        prediction: Tensor<B, 3, Int>,
    ) {
        assert_eq!(
            truth.dims(),
            prediction.dims(),
            "ground truth and prediction differ in shape"
        );
        let truth = truth.into_data();
        let prediction = prediction.into_data();

        self.update(truth.iter::<i64>().zip(prediction.iter::<i64>()));
    }

    /// Add another matrix's counts.
    ///
    /// # Panics
    ///
    /// Panics if the class counts differ.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(
            self.num_classes, other.num_classes,
            "cannot merge confusion matrices over different class counts"
        );
        for (count, other) in self.counts.iter_mut().zip(&other.counts) {
            *count += other;
        }
    }

    /// Zero every count.
    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    /// Number of counted pixels.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Pixels of class `truth` predicted as `prediction`.
    pub fn get(&self, truth: usize, prediction: usize) -> u64 {
        self.counts[truth * self.num_classes + prediction]
    }

    fn row_sum(&self, class: usize) -> u64 {
        self.counts[class * self.num_classes..(class + 1) * self.num_classes]
            .iter()
            .sum()
    }

    fn col_sum(&self, class: usize) -> u64 {
        (0..self.num_classes)
            .map(|truth| self.get(truth, class))
            .sum()
    }

    /// Derive every score from the current counts.
    pub fn scores(&self) -> SegmentationScores {
        let total = self.total() as f64;
        let n = self.num_classes;

        let mut class_accuracy = Vec::with_capacity(n);
        let mut class_iou = Vec::with_capacity(n);
        let mut trace = 0u64;
        let mut frequency_weighted = 0.0;

        for class in 0..n {
            let hits = self.get(class, class);
            let truth = self.row_sum(class);
            let union = truth + self.col_sum(class) - hits;
            trace += hits;

            class_accuracy.push((truth > 0).then(|| hits as f64 / truth as f64));
            let iou = (union > 0).then(|| hits as f64 / union as f64);
            class_iou.push(iou);

            if let (true, Some(iou)) = (truth > 0, iou) {
                frequency_weighted += truth as f64 / total * iou;
            }
        }

        if total == 0.0 {
            return SegmentationScores {
                overall_accuracy: f64::NAN,
                mean_accuracy: f64::NAN,
                frequency_weighted_accuracy: f64::NAN,
                mean_iou: f64::NAN,
                class_accuracy,
                class_iou,
            };
        }

        SegmentationScores {
            overall_accuracy: trace as f64 / total,
            mean_accuracy: defined_mean(&class_accuracy),
            frequency_weighted_accuracy: frequency_weighted,
            mean_iou: defined_mean(&class_iou),
            class_accuracy,
            class_iou,
        }
    }
}

fn defined_mean(values: &[Option<f64>]) -> f64 {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    if defined.is_empty() {
        f64::NAN
    } else {
        defined.iter().sum::<f64>() / defined.len() as f64
    }
}

/// Scores of one evaluation pass.
///
/// Aggregates are `NaN` when nothing was counted; per-class entries are `None` when
/// the ratio is undefined for that class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationScores {
    pub overall_accuracy: f64,
    pub mean_accuracy: f64,
    pub frequency_weighted_accuracy: f64,
    pub mean_iou: f64,
    pub class_accuracy: Vec<Option<f64>>,
    pub class_iou: Vec<Option<f64>>,
}
