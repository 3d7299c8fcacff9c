//! Hold-out evaluation: error aggregates, bootstrap confidence, and
//! per-sequence predictions with risk bands.
//!
//! Aggregate measures (MSE, MAE, R², accuracy) are computed over raw
//! (denormalised) subsidence values. Per-prediction confidence comes from a
//! seeded bootstrap over the model's validation residual pool: each resample
//! contributes its `confidence_level` quantile of absolute residuals, and a
//! prediction's confidence is the fraction of resamples whose quantile covers
//! that prediction's own absolute residual. The estimate is deterministic
//! given the pool, the sample count, and the seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use subsidence_core::{Location, PredictionResult, DAYS_PER_YEAR};

use crate::dataset::SequenceDataset;
use crate::trainer::TrainedModel;

// ---------------------------------------------------------------------------
// Error aggregates
// ---------------------------------------------------------------------------

/// Mean squared error. Returns 0 for empty input.
#[must_use]
pub fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum::<f64>()
        / predicted.len() as f64
}

/// Mean absolute error. Returns 0 for empty input.
#[must_use]
pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

/// Coefficient of determination `1 - SS_res / SS_tot`.
///
/// A constant actual series has no variance to explain: the score is 1 when
/// the predictions are exact and 0 otherwise.
#[must_use]
pub fn r2_score(predicted: &[f64], actual: &[f64]) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean) * (a - mean)).sum();
    let ss_res: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    if ss_tot < 1e-12 {
        return if ss_res < 1e-12 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Absolute tolerance used by the accuracy measure: one tenth of the observed
/// target range, falling back to 0.1 when the targets are constant.
#[must_use]
pub fn accuracy_tolerance(targets: &[f64]) -> f64 {
    let min = targets.iter().copied().fold(f64::INFINITY, f64::min);
    let max = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range.is_finite() && range > 0.0 {
        0.1 * range
    } else {
        0.1
    }
}

/// Fraction of predictions within `tolerance` of their actual value.
#[must_use]
pub fn within_tolerance_fraction(predicted: &[f64], actual: &[f64], tolerance: f64) -> f64 {
    assert_eq!(predicted.len(), actual.len());
    if predicted.is_empty() {
        return 0.0;
    }
    let hits = predicted
        .iter()
        .zip(actual)
        .filter(|(p, a)| (*p - *a).abs() <= tolerance)
        .count();
    hits as f64 / predicted.len() as f64
}

// ---------------------------------------------------------------------------
// Bootstrap confidence
// ---------------------------------------------------------------------------

/// Bootstrap distribution of the residual-quantile threshold.
#[derive(Debug, Clone)]
pub struct BootstrapConfidence {
    thresholds: Vec<f64>,
}

impl BootstrapConfidence {
    /// Resample `residuals` with replacement `samples` times, keeping the
    /// `level` quantile of absolute residuals from each resample.
    #[must_use]
    pub fn fit(residuals: &[f64], samples: usize, level: f64, seed: u64) -> Self {
        if residuals.is_empty() || samples == 0 {
            return BootstrapConfidence { thresholds: Vec::new() };
        }
        let n = residuals.len();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut thresholds = Vec::with_capacity(samples);
        let mut resample = vec![0.0; n];
        for _ in 0..samples {
            for slot in resample.iter_mut() {
                *slot = residuals[rng.gen_range(0..n)].abs();
            }
            resample.sort_by(f64::total_cmp);
            // Nearest-rank quantile.
            let rank = ((level * n as f64).ceil() as usize).clamp(1, n);
            thresholds.push(resample[rank - 1]);
        }
        debug!(
            pool = n,
            samples,
            level,
            "fitted bootstrap confidence thresholds"
        );
        BootstrapConfidence { thresholds }
    }

    /// Confidence for a prediction with the given absolute residual: the
    /// fraction of bootstrap thresholds that cover it. Always in `[0, 1]`;
    /// 0 when no pool was available.
    #[must_use]
    pub fn confidence(&self, abs_residual: f64) -> f64 {
        if self.thresholds.is_empty() {
            return 0.0;
        }
        let covered = self
            .thresholds
            .iter()
            .filter(|&&t| t >= abs_residual)
            .count();
        covered as f64 / self.thresholds.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Prediction assembly
// ---------------------------------------------------------------------------

/// Yearly subsidence rate implied by a forecast: the change from the start
/// of the context window to the forecast, annualised over the window span.
///
/// The rate is estimated over the full window rather than the single-step
/// forecast horizon; over one sampling step the annualisation factor would
/// amplify forecast noise by two orders of magnitude.
#[must_use]
pub(crate) fn implied_yearly_rate(predicted: f64, start_subsidence: f64, span_days: f64) -> f64 {
    if span_days > 0.0 {
        (predicted - start_subsidence) / span_days * DAYS_PER_YEAR
    } else {
        0.0
    }
}

/// Forecast the given dataset indices and assemble [`PredictionResult`]s
/// with bootstrap confidence and risk classification.
#[must_use]
pub fn predict_indices(
    model: &TrainedModel,
    dataset: &SequenceDataset,
    indices: &[usize],
) -> Vec<PredictionResult> {
    let bootstrap = BootstrapConfidence::fit(
        &model.residual_pool,
        model.config.bootstrap_samples,
        model.config.confidence_level,
        model.config.seed,
    );

    indices
        .iter()
        .map(|&i| {
            let seq = dataset.get(i);
            let predicted = model.forecast(&seq.context);
            let actual = seq.target_subsidence();

            let span_days = seq
                .target
                .timestamp
                .signed_duration_since(seq.context_start)
                .num_milliseconds() as f64
                / 86_400_000.0;
            let rate = implied_yearly_rate(predicted, seq.context[[0, 0]], span_days);

            PredictionResult {
                station: seq.station.clone(),
                timestamp: seq.target.timestamp,
                actual_subsidence: actual,
                predicted_subsidence: predicted,
                confidence: bootstrap.confidence((predicted - actual).abs()),
                risk_level: model.config.risk_thresholds.classify(rate),
                location: Location {
                    easting: seq.target.easting,
                    northing: seq.target.northing,
                },
            }
        })
        .collect()
}

/// Aggregate hold-out report for one trained model.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// Mean squared error over the evaluated indices.
    pub mse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination.
    pub r2: f64,
    /// Fraction of predictions within the accuracy tolerance.
    pub accuracy: f64,
    /// The individual predictions behind the aggregates.
    pub predictions: Vec<PredictionResult>,
}

/// Evaluate `model` over the given dataset indices.
#[must_use]
pub fn evaluate(
    model: &TrainedModel,
    dataset: &SequenceDataset,
    indices: &[usize],
) -> EvaluationReport {
    let predictions = predict_indices(model, dataset, indices);
    let predicted: Vec<f64> = predictions.iter().map(|p| p.predicted_subsidence).collect();
    let actual: Vec<f64> = predictions.iter().map(|p| p.actual_subsidence).collect();
    let tolerance = accuracy_tolerance(&actual);

    EvaluationReport {
        mse: mean_squared_error(&predicted, &actual),
        mae: mean_absolute_error(&predicted, &actual),
        r2: r2_score(&predicted, &actual),
        accuracy: within_tolerance_fraction(&predicted, &actual, tolerance),
        predictions,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn error_aggregates_on_known_vectors() {
        let predicted = [1.0, 2.0, 3.0];
        let actual = [1.0, 2.0, 5.0];
        assert_abs_diff_eq!(mean_squared_error(&predicted, &actual), 4.0 / 3.0);
        assert_abs_diff_eq!(mean_absolute_error(&predicted, &actual), 2.0 / 3.0);
    }

    #[test]
    fn perfect_predictions_score_r2_of_one() {
        let v = [0.5, 1.5, 2.5, 4.0];
        assert_abs_diff_eq!(r2_score(&v, &v), 1.0);
    }

    #[test]
    fn mean_prediction_scores_r2_of_zero() {
        let actual = [1.0, 2.0, 3.0];
        let predicted = [2.0, 2.0, 2.0];
        assert_abs_diff_eq!(r2_score(&predicted, &actual), 0.0);
    }

    #[test]
    fn constant_actuals_do_not_divide_by_zero() {
        let actual = [2.0, 2.0, 2.0];
        assert_abs_diff_eq!(r2_score(&actual, &actual), 1.0);
        assert_abs_diff_eq!(r2_score(&[1.0, 2.0, 3.0], &actual), 0.0);
    }

    #[test]
    fn tolerance_is_a_tenth_of_the_range() {
        assert_abs_diff_eq!(accuracy_tolerance(&[0.0, 1.0, 0.5]), 0.1);
        // Constant targets fall back to the absolute default.
        assert_abs_diff_eq!(accuracy_tolerance(&[3.0, 3.0]), 0.1);
    }

    #[test]
    fn within_tolerance_counts_hits() {
        let predicted = [1.0, 2.0, 10.0, 4.05];
        let actual = [1.0, 2.05, 3.0, 4.0];
        assert_abs_diff_eq!(
            within_tolerance_fraction(&predicted, &actual, 0.1),
            0.75
        );
    }

    #[test]
    fn bootstrap_is_deterministic_for_one_seed() {
        let residuals = [0.1, -0.4, 0.25, 0.05, -0.15];
        let a = BootstrapConfidence::fit(&residuals, 200, 0.95, 42);
        let b = BootstrapConfidence::fit(&residuals, 200, 0.95, 42);
        assert_abs_diff_eq!(a.confidence(0.2), b.confidence(0.2));
    }

    #[test]
    fn zero_residual_has_full_confidence() {
        let residuals = [0.1, -0.4, 0.25];
        let bootstrap = BootstrapConfidence::fit(&residuals, 100, 0.95, 7);
        assert_abs_diff_eq!(bootstrap.confidence(0.0), 1.0);
    }

    #[test]
    fn huge_residual_has_no_confidence() {
        let residuals = [0.1, -0.4, 0.25];
        let bootstrap = BootstrapConfidence::fit(&residuals, 100, 0.95, 7);
        assert_abs_diff_eq!(bootstrap.confidence(1e6), 0.0);
    }

    #[test]
    fn empty_pool_yields_zero_confidence() {
        let bootstrap = BootstrapConfidence::fit(&[], 100, 0.95, 7);
        assert_abs_diff_eq!(bootstrap.confidence(0.0), 0.0);
    }

    #[test]
    fn implied_rate_annualises_over_the_window_span() {
        // One unit of sinking over a one-day span is 365 units per year.
        assert_abs_diff_eq!(implied_yearly_rate(2.0, 1.0, 1.0), 365.0);
        // The same change over a 30-day window is a far gentler rate.
        assert_abs_diff_eq!(implied_yearly_rate(2.0, 1.0, 30.0), 365.0 / 30.0);
        // Degenerate span yields a neutral rate rather than infinity.
        assert_abs_diff_eq!(implied_yearly_rate(2.0, 1.0, 0.0), 0.0);
    }
}
