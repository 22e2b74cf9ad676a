/// Average of per-batch losses over one epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningLoss {
    sum: f64,
    count: usize,
}

impl RunningLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch's loss.
    pub fn update(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    /// Batches recorded so far.
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Mean loss, `NaN` before the first update.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Best score seen so far.
///
/// Starts below every real score. A new score replaces the watermark when it is
/// greater than or equal to it, so ties go to the most recent epoch. `NaN` never
/// improves.
#[derive(Debug, Clone, PartialEq)]
pub struct BestScore {
    best: f64,
    epoch: Option<usize>,
}

impl Default for BestScore {
    fn default() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            epoch: None,
        }
    }
}

impl BestScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `score` from `epoch`; returns whether it became the new best.
    pub fn observe(&mut self, epoch: usize, score: f64) -> bool {
        if score >= self.best {
            self.best = score;
            self.epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    /// `(epoch, score)` of the current best, if any score was accepted.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.epoch.map(|epoch| (epoch, self.best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_loss_averages_batches() {
        let mut loss = RunningLoss::new();
        assert!(loss.mean().is_nan());

        for value in [1.0, 2.0, 6.0] {
            loss.update(value);
        }

        assert_eq!(loss.count(), 3);
        assert_eq!(loss.mean(), 3.0);

        loss.reset();
        assert_eq!(loss.count(), 0);
    }

    #[test]
    fn increasing_scores_always_improve() {
        let mut best = BestScore::new();
        let improved: Vec<bool> = [0.1, 0.2, 0.3, 0.4]
            .iter()
            .enumerate()
            .map(|(epoch, &score)| best.observe(epoch, score))
            .collect();

        assert_eq!(improved, vec![true; 4]);
        assert_eq!(best.best(), Some((3, 0.4)));
    }

    #[test]
    fn decreasing_scores_only_improve_once() {
        let mut best = BestScore::new();
        let improved: Vec<bool> = [0.5, 0.4, 0.3, 0.1]
            .iter()
            .enumerate()
            .map(|(epoch, &score)| best.observe(epoch, score))
            .collect();

        assert_eq!(improved, vec![true, false, false, false]);
        assert_eq!(best.best(), Some((0, 0.5)));
    }

    #[test]
    fn ties_favor_the_latest_epoch() {
        let mut best = BestScore::new();
        best.observe(0, 0.5);

        assert!(best.observe(1, 0.5));
        assert_eq!(best.best(), Some((1, 0.5)));
    }

    #[test]
    fn nan_never_improves() {
        let mut best = BestScore::new();

        assert!(!best.observe(0, f64::NAN));
        assert_eq!(best.best(), None);
        assert!(best.observe(1, 0.0));
    }
}
