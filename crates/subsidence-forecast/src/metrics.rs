//! Training metrics: per-epoch records and the aggregated run summary.
//!
//! One [`EpochMetric`] is appended per completed epoch and is read-only after
//! creation. The collection of epoch records, plus the held-out aggregate
//! error measures computed by the evaluator, forms the final [`ModelMetrics`]
//! of a run. `ModelMetrics` is produced once per completed training run and
//! is immutable thereafter; `rmse == sqrt(mse)` always holds by construction.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EpochMetric
// ---------------------------------------------------------------------------

/// Snapshot of one completed training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetric {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss (MSE + L2 term) over the epoch's batches.
    pub training_loss: f64,
    /// Loss on the temporal hold-out split.
    pub validation_loss: f64,
    /// Fraction of validation predictions within the accuracy tolerance.
    pub accuracy: f64,
    /// Learning rate in effect during this epoch (after step decay).
    pub learning_rate: f64,
    /// Wall-clock duration of the epoch in milliseconds.
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// ModelMetrics
// ---------------------------------------------------------------------------

/// Aggregated quality metrics for one completed training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Mean squared error on the held-out set.
    pub mse: f64,
    /// Root mean squared error; always `sqrt(mse)`.
    pub rmse: f64,
    /// Mean absolute error on the held-out set.
    pub mae: f64,
    /// Fraction of held-out predictions within the accuracy tolerance.
    pub accuracy: f64,
    /// Coefficient of determination `1 - SS_res / SS_tot`.
    pub r2_score: f64,
    /// Per-epoch training-loss series.
    pub training_loss: Vec<f64>,
    /// Per-epoch validation-loss series.
    pub validation_loss: Vec<f64>,
    /// Full per-epoch records.
    pub epoch_details: Vec<EpochMetric>,
}

impl ModelMetrics {
    /// Assemble run metrics from the held-out aggregates and the epoch log.
    ///
    /// `rmse` is derived from `mse` here so the two can never disagree.
    #[must_use]
    pub fn new(
        mse: f64,
        mae: f64,
        accuracy: f64,
        r2_score: f64,
        epoch_details: Vec<EpochMetric>,
    ) -> Self {
        let training_loss = epoch_details.iter().map(|e| e.training_loss).collect();
        let validation_loss = epoch_details.iter().map(|e| e.validation_loss).collect();
        ModelMetrics {
            mse,
            rmse: mse.sqrt(),
            mae,
            accuracy,
            r2_score,
            training_loss,
            validation_loss,
            epoch_details,
        }
    }

    /// Number of completed epochs recorded in this run.
    #[must_use]
    pub fn num_epochs(&self) -> usize {
        self.epoch_details.len()
    }

    /// A human-readable summary line suitable for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "RMSE={:.6}  MAE={:.6}  R2={:.4}  acc={:.4}  (epochs={})",
            self.rmse,
            self.mae,
            self.r2_score,
            self.accuracy,
            self.num_epochs()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(n: usize, train: f64, val: f64) -> EpochMetric {
        EpochMetric {
            epoch: n,
            training_loss: train,
            validation_loss: val,
            accuracy: 0.5,
            learning_rate: 1e-3,
            duration_ms: 10,
        }
    }

    #[test]
    fn rmse_is_sqrt_of_mse() {
        let m = ModelMetrics::new(4.0, 1.5, 0.8, 0.9, vec![]);
        assert!((m.rmse - 2.0).abs() < 1e-12);
    }

    #[test]
    fn loss_series_mirror_epoch_details() {
        let m = ModelMetrics::new(
            0.01,
            0.05,
            0.7,
            0.8,
            vec![epoch(1, 0.9, 1.0), epoch(2, 0.5, 0.6)],
        );
        assert_eq!(m.training_loss, vec![0.9, 0.5]);
        assert_eq!(m.validation_loss, vec![1.0, 0.6]);
        assert_eq!(m.num_epochs(), 2);
    }

    #[test]
    fn summary_mentions_epoch_count() {
        let m = ModelMetrics::new(0.01, 0.05, 0.7, 0.8, vec![epoch(1, 0.9, 1.0)]);
        assert!(m.summary().contains("epochs=1"));
    }
}
