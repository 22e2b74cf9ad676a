use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    prelude::*,
    tensor::ElementConversion,
};

/// Configuration of [`PixelCrossEntropy`].
#[derive(Config, Debug, PartialEq)]
pub struct LossConfig {
    /// One weight per class; uniform when absent.
    #[config(default = "None")]
    pub class_weights: Option<Vec<f32>>,
    /// Label excluded from the loss, typically a void class such as 255.
    #[config(default = "None")]
    pub ignore_index: Option<i64>,
}

impl LossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PixelCrossEntropy<B> {
        PixelCrossEntropy {
            ce_loss: CrossEntropyLossConfig::new()
                .with_weights(self.class_weights.clone())
                .init(device),
            ignore_index: Ignored(self.ignore_index),
        }
    }
}

/// Cross-entropy between per-pixel class scores and a label map.
///
/// Pixels are flattened into rows for Burn's [`CrossEntropyLoss`]. Ignored pixels
/// are dropped before it runs rather than passed as padding tokens: padding only
/// zeroes their terms, so they would still count in the mean, and a void label
/// such as 255 lies outside the class range the loss indexes with. The result is
/// the weighted mean `Σ w[t]·(−log p[t]) / Σ w[t]` over the remaining pixels, and
/// zero when every pixel is ignored.
#[derive(Module, Debug)]
pub struct PixelCrossEntropy<B: Backend> {
    /// Cross-entropy criterion over `[pixels, classes]` rows.
    pub ce_loss: CrossEntropyLoss<B>,
    /// Label excluded from the loss.
    pub ignore_index: Ignored<Option<i64>>,
}

impl<B: Backend> PixelCrossEntropy<B> {
    /// # Shapes
    ///   - scores: `[batch, classes, height, width]`
    ///   - targets: `[batch, height, width]`
    ///   - output: `[1]`
    pub fn forward(&self, scores: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [batch, classes, height, width] = scores.dims();
        assert_eq!(
            targets.dims(),
            [batch, height, width],
            "label map does not match the score map"
        );
        let pixels = batch * height * width;

        let logits = scores.permute([0, 2, 3, 1]).reshape([pixels, classes]);
        let targets = targets.reshape([pixels]);

        let Some(ignore) = self.ignore_index.0 else {
            return self.ce_loss.forward(logits, targets);
        };

        let kept = targets.clone().not_equal_elem(ignore);
        let count = kept.clone().int().sum().into_scalar().elem::<i64>() as usize;
        if count == 0 {
            // keeps the graph so backward still runs
            return logits.sum().mul_scalar(0.0);
        }

        let rows = kept.argwhere().reshape([count]);
        self.ce_loss
            .forward(logits.select(0, rows.clone()), targets.select(0, rows))
    }
}
