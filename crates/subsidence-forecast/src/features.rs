//! Observation cleaning and kinematic feature derivation.
//!
//! The first two pipeline stages, both pure functions over a station's
//! time-ordered observations:
//!
//! - [`clean`] drops records with non-finite coordinates or
//!   multi-order-of-magnitude subsidence spikes (RINEX/coordinate noise)
//!   that would destabilise the derivative features downstream.
//! - [`derive`] computes subsidence against the station baseline, plus the
//!   velocity, acceleration, and annualised-rate derivatives.
//!
//! Per-record problems are reported through the collected
//! [`Diagnostic`] list, never as errors; a station whose cleaned history is
//! too short for a single sequence is excluded with an
//! [`DiagnosticKind::InsufficientHistory`] finding.

use tracing::{debug, warn};

use subsidence_core::{
    Diagnostic, DiagnosticKind, FeatureRecord, Observation, StationSeries, DAYS_PER_YEAR,
};

use crate::config::ModelConfig;
use crate::error::DataError;

/// A cleaned, feature-derived station series ready for sequencing.
#[derive(Debug, Clone)]
pub struct FeatureSeries {
    /// The station the features belong to.
    pub station: subsidence_core::StationId,
    /// Feature records in ascending timestamp order.
    pub records: Vec<FeatureRecord>,
}

// ---------------------------------------------------------------------------
// Cleaner
// ---------------------------------------------------------------------------

/// Validate and filter one station's raw observations.
///
/// A record is dropped when any coordinate is non-finite, or when its derived
/// subsidence magnitude (first valid height minus current height) exceeds
/// `config.max_abs_subsidence`. The function is pure and idempotent: cleaning
/// already-clean data returns the same records unchanged.
///
/// # Errors
///
/// Returns [`DataError::UnorderedSeries`] or [`DataError::DuplicateTimestamp`]
/// when the batch is not strictly ascending in time — a structural problem in
/// the ingestion collaborator, not a per-record data-quality issue.
pub fn clean(
    series: &StationSeries,
    config: &ModelConfig,
) -> Result<(Vec<Observation>, Vec<Diagnostic>), DataError> {
    // Structural check first: the sequencer relies on strict time order.
    for (i, pair) in series.observations.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(DataError::UnorderedSeries {
                station: series.station.to_string(),
                index: i + 1,
            });
        }
        if pair[1].timestamp == pair[0].timestamp {
            return Err(DataError::DuplicateTimestamp {
                station: series.station.to_string(),
                index: i + 1,
            });
        }
    }

    let mut diagnostics = Vec::new();
    let mut kept: Vec<Observation> = Vec::with_capacity(series.observations.len());
    let mut baseline: Option<f64> = None;

    for (i, obs) in series.observations.iter().enumerate() {
        if !obs.is_finite() {
            warn!(station = %series.station, index = i, "dropping non-finite observation");
            diagnostics.push(Diagnostic::for_station(
                DiagnosticKind::NonFiniteCoordinate,
                series.station.clone(),
                format!("observation {i} has a non-finite coordinate"),
            ));
            continue;
        }

        // Baseline is the first valid height of the series.
        let base = *baseline.get_or_insert(obs.height);
        let subsidence = base - obs.height;
        if subsidence.abs() > config.max_abs_subsidence {
            warn!(
                station = %series.station,
                index = i,
                subsidence,
                "dropping subsidence outlier"
            );
            diagnostics.push(Diagnostic::for_station(
                DiagnosticKind::SubsidenceOutlier,
                series.station.clone(),
                format!(
                    "observation {i} implies |subsidence| {:.3} > bound {:.3}",
                    subsidence.abs(),
                    config.max_abs_subsidence
                ),
            ));
            continue;
        }

        kept.push(obs.clone());
    }

    if kept.len() < config.sequence_length + 1 {
        diagnostics.push(Diagnostic::for_station(
            DiagnosticKind::InsufficientHistory,
            series.station.clone(),
            format!(
                "{} valid records, need at least {} for one sequence",
                kept.len(),
                config.sequence_length + 1
            ),
        ));
    }

    debug!(
        station = %series.station,
        kept = kept.len(),
        dropped = series.observations.len() - kept.len(),
        "cleaned station series"
    );
    Ok((kept, diagnostics))
}

// ---------------------------------------------------------------------------
// FeatureDeriver
// ---------------------------------------------------------------------------

/// Derive kinematic features from one station's cleaned observations.
///
/// For the i-th record of the time-ordered series:
///
/// ```text
/// subsidence[i]   = height[0] - height[i]
/// velocity[i]     = (subsidence[i] - subsidence[i-1]) / dt_days[i]   (0 at i = 0)
/// acceleration[i] = (velocity[i] - velocity[i-1]) / dt_days[i]       (0 at i = 0)
/// yearly_rate[i]  = velocity[i] * 365
/// ```
///
/// Deterministic given the same cleaned input; no randomness. Environmental
/// covariates, when supplied by the ingestion collaborator, are attached per
/// record via `covariates` and carried through unchanged (`covariates` must
/// be empty or one row per observation; rows beyond the cleaned length are
/// ignored positionally by index).
#[must_use]
pub fn derive(
    station: &subsidence_core::StationId,
    cleaned: &[Observation],
    covariates: &[Vec<f64>],
) -> FeatureSeries {
    let mut records: Vec<FeatureRecord> = Vec::with_capacity(cleaned.len());

    for (i, obs) in cleaned.iter().enumerate() {
        let subsidence = cleaned[0].height - obs.height;
        let (velocity, acceleration) = if i == 0 {
            (0.0, 0.0)
        } else {
            let prev = &records[i - 1];
            let dt_days = elapsed_days(&cleaned[i - 1], obs);
            // clean() rejects duplicate timestamps, so dt_days > 0 here.
            let velocity = (subsidence - prev.subsidence) / dt_days;
            let acceleration = (velocity - prev.velocity) / dt_days;
            (velocity, acceleration)
        };

        records.push(FeatureRecord {
            timestamp: obs.timestamp,
            easting: obs.easting,
            northing: obs.northing,
            height: obs.height,
            subsidence,
            velocity,
            acceleration,
            yearly_rate: velocity * DAYS_PER_YEAR,
            covariates: covariates.get(i).cloned().unwrap_or_default(),
        });
    }

    FeatureSeries { station: station.clone(), records }
}

/// Elapsed time between two observations in fractional days.
fn elapsed_days(earlier: &Observation, later: &Observation) -> f64 {
    let millis = later
        .timestamp
        .signed_duration_since(earlier.timestamp)
        .num_milliseconds();
    millis as f64 / 86_400_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone, Utc};
    use subsidence_core::StationId;

    fn obs(day: i64, height: f64) -> Observation {
        Observation {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::days(day),
            easting: 754_000.0,
            northing: 9_893_000.0,
            height,
            geoid_separation: 22.0,
        }
    }

    fn daily_series(heights: &[f64]) -> StationSeries {
        StationSeries::new(
            StationId::new("CPDG"),
            heights.iter().enumerate().map(|(d, &h)| obs(d as i64, h)).collect(),
        )
    }

    fn short_config() -> ModelConfig {
        let mut cfg = ModelConfig::default();
        cfg.sequence_length = 7;
        cfg
    }

    #[test]
    fn clean_passes_valid_records_through() {
        let series = daily_series(&[10.0, 9.99, 9.98, 9.97, 9.96, 9.95, 9.94, 9.93]);
        let (kept, diags) = clean(&series, &short_config()).unwrap();
        assert_eq!(kept.len(), 8);
        assert!(diags.is_empty());
    }

    #[test]
    fn clean_drops_non_finite_coordinates() {
        let mut series = daily_series(&[10.0; 10]);
        series.observations[3].height = f64::NAN;
        series.observations[5].easting = f64::INFINITY;
        let (kept, diags) = clean(&series, &short_config()).unwrap();
        assert_eq!(kept.len(), 8);
        assert_eq!(
            diags
                .iter()
                .filter(|d| d.kind == DiagnosticKind::NonFiniteCoordinate)
                .count(),
            2
        );
    }

    #[test]
    fn clean_drops_subsidence_spikes() {
        let mut heights = vec![10.0; 10];
        heights[4] = -500.0; // |subsidence| = 510 > 100 bound
        let series = daily_series(&heights);
        let (kept, diags) = clean(&series, &short_config()).unwrap();
        assert_eq!(kept.len(), 9);
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::SubsidenceOutlier));
    }

    #[test]
    fn clean_is_idempotent() {
        let mut heights = vec![10.0; 12];
        heights[2] = 9000.0;
        let series = daily_series(&heights);
        let cfg = short_config();

        let (once, _) = clean(&series, &cfg).unwrap();
        let again = StationSeries::new(series.station.clone(), once.clone());
        let (twice, diags) = clean(&again, &cfg).unwrap();
        assert_eq!(once, twice);
        assert!(diags.iter().all(|d| d.kind != DiagnosticKind::SubsidenceOutlier));
    }

    #[test]
    fn clean_flags_insufficient_history() {
        let series = daily_series(&[10.0, 9.9, 9.8]);
        let (kept, diags) = clean(&series, &short_config()).unwrap();
        assert_eq!(kept.len(), 3);
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::InsufficientHistory));
    }

    #[test]
    fn clean_rejects_out_of_order_batches() {
        let mut series = daily_series(&[10.0, 9.9, 9.8, 9.7, 9.6, 9.5, 9.4, 9.3]);
        series.observations.swap(2, 3);
        assert!(matches!(
            clean(&series, &short_config()),
            Err(DataError::UnorderedSeries { .. })
        ));
    }

    #[test]
    fn derive_baseline_subsidence_is_zero() {
        let series = daily_series(&[10.0, 9.99, 9.97]);
        let fs = derive(&series.station, &series.observations, &[]);
        assert_abs_diff_eq!(fs.records[0].subsidence, 0.0);
        assert_abs_diff_eq!(fs.records[0].velocity, 0.0);
        assert_abs_diff_eq!(fs.records[0].acceleration, 0.0);
    }

    #[test]
    fn derive_velocity_is_exact_first_difference() {
        let series = daily_series(&[10.0, 9.99, 9.97, 9.94]);
        let fs = derive(&series.station, &series.observations, &[]);
        for i in 1..fs.records.len() {
            let expected =
                (fs.records[i].subsidence - fs.records[i - 1].subsidence) / 1.0;
            // Direct arithmetic definition: exact equality, no tolerance needed.
            assert_eq!(fs.records[i].velocity, expected);
        }
        assert_abs_diff_eq!(fs.records[1].velocity, 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(fs.records[2].velocity, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn derive_acceleration_is_velocity_difference() {
        let series = daily_series(&[10.0, 9.99, 9.97, 9.94]);
        let fs = derive(&series.station, &series.observations, &[]);
        for i in 1..fs.records.len() {
            let expected = fs.records[i].velocity - fs.records[i - 1].velocity;
            assert_eq!(fs.records[i].acceleration, expected);
        }
    }

    #[test]
    fn derive_yearly_rate_annualises_velocity() {
        let series = daily_series(&[10.0, 9.99]);
        let fs = derive(&series.station, &series.observations, &[]);
        assert_abs_diff_eq!(
            fs.records[1].yearly_rate,
            fs.records[1].velocity * 365.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn derive_respects_irregular_sampling() {
        let mut observations = vec![obs(0, 10.0), obs(2, 9.98)];
        observations.push(obs(7, 9.88));
        let fs = derive(&StationId::new("IRR1"), &observations, &[]);
        // 0.02 m over 2 days, then 0.10 m over 5 days.
        assert_abs_diff_eq!(fs.records[1].velocity, 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(fs.records[2].velocity, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn derive_carries_covariates_through() {
        let series = daily_series(&[10.0, 9.99]);
        let covs = vec![vec![28.5, 120.0], vec![29.1, 80.0]];
        let fs = derive(&series.station, &series.observations, &covs);
        assert_eq!(fs.records[0].covariates, vec![28.5, 120.0]);
        assert_eq!(fs.records[1].covariates, vec![29.1, 80.0]);
    }

    #[test]
    fn derive_is_deterministic() {
        let series = daily_series(&[10.0, 9.97, 9.91, 9.82]);
        let a = derive(&series.station, &series.observations, &[]);
        let b = derive(&series.station, &series.observations, &[]);
        assert_eq!(a.records, b.records);
    }
}
