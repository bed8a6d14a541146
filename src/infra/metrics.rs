// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Appends one CSV row per training step.
//
// Metrics recorded per step:
//   - step:          the step number (1, 2, 3, ...)
//   - encoder_loss:  squared norm of the gradients the encoder
//                    received this step. Not a loss in the
//                    objective sense, but it tracks how hard the
//                    consumers are pulling on the encoder and
//                    should fall as training settles.
//   - consumer_loss: summed loss of the consumer models
//
// Output file: checkpoints/metrics.csv

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step:          usize,
    pub encoder_loss:  f64,
    pub consumer_loss: f64,
}

impl StepMetrics {
    pub fn new(step: usize, encoder_loss: f64, consumer_loss: f64) -> Self {
        Self { step, encoder_loss, consumer_loss }
    }
}

/// Logs step metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// repeated runs append to one log.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "step,encoder_loss,consumer_loss")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one step's metrics as a new row.
    pub fn log(&self, m: &StepMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6}",
            m.step,
            m.encoder_loss,
            m.consumer_loss,
        )?;

        tracing::debug!(
            "Logged step {} metrics: encoder_loss={:.4}, consumer_loss={:.4}",
            m.step,
            m.encoder_loss,
            m.consumer_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let logger = MetricsLogger::new(path).unwrap();
        logger.log(&StepMetrics::new(1, 0.5, 1.25)).unwrap();

        // A second logger over the same directory must append,
        // not truncate.
        let logger = MetricsLogger::new(path).unwrap();
        logger.log(&StepMetrics::new(2, 0.25, 1.0)).unwrap();

        let contents = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "step,encoder_loss,consumer_loss");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,0.5"));
        assert!(lines[2].starts_with("2,0.25"));
    }
}
