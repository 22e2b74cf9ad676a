use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use segnet_metric::SegmentationScores;

use crate::error::{RoutineError, RoutineResult};

/// Plain-text sink of per-epoch summaries.
///
/// One line per epoch:
/// `epoch 3/10 loss 0.412300 overall_acc 0.9012 mean_acc 0.7421 fw_acc 0.8350 mean_iou 0.6310`
#[derive(Debug)]
pub struct MetricsLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl MetricsLog {
    /// Create (or truncate) the log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> RoutineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RoutineError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(&path).map_err(|source| RoutineError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> RoutineError {
        RoutineError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append the summary of one epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written.
    pub fn write_epoch(
        &mut self,
        epoch: usize,
        max_epochs: usize,
        loss: f64,
        scores: &SegmentationScores,
    ) -> RoutineResult<()> {
        writeln!(
            self.writer,
            "epoch {epoch}/{max_epochs} loss {loss:.6} overall_acc {:.4} mean_acc {:.4} fw_acc {:.4} mean_iou {:.4}",
            scores.overall_accuracy,
            scores.mean_accuracy,
            scores.frequency_weighted_accuracy,
            scores.mean_iou,
        )
        .map_err(|source| self.io(source))
    }

    /// Flush and close the file.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered lines cannot be flushed.
    pub fn close(mut self) -> RoutineResult<()> {
        self.writer.flush().map_err(|source| self.io(source))
    }
}

#[cfg(test)]
mod tests {
    use segnet_metric::ConfusionMatrix;

    use super::*;

    #[test]
    fn writes_one_line_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/train.txt");
        let mut matrix = ConfusionMatrix::new(2);
        matrix.update_slices(&[0, 0, 1, 1], &[0, 0, 1, 1]);
        let scores = matrix.scores();

        let mut log = MetricsLog::create(&path).unwrap();
        log.write_epoch(1, 2, 0.5, &scores).unwrap();
        log.write_epoch(2, 2, 0.25, &scores).unwrap();
        log.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "epoch 1/2 loss 0.500000 overall_acc 1.0000 mean_acc 1.0000 fw_acc 1.0000 mean_iou 1.0000",
                "epoch 2/2 loss 0.250000 overall_acc 1.0000 mean_acc 1.0000 fw_acc 1.0000 mean_iou 1.0000",
            ]
        );
    }
}
