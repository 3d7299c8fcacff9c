//! Core data types for the land-subsidence monitoring system.
//!
//! This module defines the fundamental data structures shared between the
//! ingestion collaborators and the forecasting pipeline.
//!
//! # Type Categories
//!
//! - **Observation Types**: [`StationId`], [`Observation`], [`StationSeries`]
//! - **Feature Types**: [`FeatureRecord`]
//! - **Risk Types**: [`RiskLevel`], [`RiskThresholds`]
//! - **Result Types**: [`PredictionResult`], [`Location`]
//! - **Diagnostics**: [`Diagnostic`], [`DiagnosticKind`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Observation Types
// =============================================================================

/// Unique identifier for a monitoring station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId(String);

impl StationId {
    /// Creates a new station ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the station ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single raw positional observation at a monitoring station.
///
/// Observations are appended by the ingestion collaborator and never mutated.
/// Coordinates are projected (easting/northing in metres); `height` is the
/// ellipsoidal height and `geoid_separation` relates it to orthometric height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Sampling instant (ISO-8601 in the wire format).
    pub timestamp: DateTime<Utc>,
    /// Easting coordinate in metres.
    pub easting: f64,
    /// Northing coordinate in metres.
    pub northing: f64,
    /// Ellipsoidal height in metres.
    pub height: f64,
    /// Geoid separation in metres.
    pub geoid_separation: f64,
}

impl Observation {
    /// Returns `true` when every coordinate field is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.easting.is_finite()
            && self.northing.is_finite()
            && self.height.is_finite()
            && self.geoid_separation.is_finite()
    }
}

/// The time-ordered observation batch for one station, as handed over by the
/// ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSeries {
    /// The observed station.
    pub station: StationId,
    /// Observations ordered by timestamp.
    pub observations: Vec<Observation>,
}

impl StationSeries {
    /// Creates a new series for `station`.
    #[must_use]
    pub fn new(station: StationId, observations: Vec<Observation>) -> Self {
        Self { station, observations }
    }
}

// =============================================================================
// Feature Types
// =============================================================================

/// An [`Observation`] augmented with derived kinematic features.
///
/// `subsidence` is measured against the first valid height of the station's
/// series (baseline), so `subsidence == 0.0` for the first record. `velocity`
/// is the first difference of subsidence over elapsed days and `acceleration`
/// the first difference of velocity; both are carried forward as `0.0` at the
/// series start where the difference is undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Sampling instant of the underlying observation.
    pub timestamp: DateTime<Utc>,
    /// Easting coordinate in metres.
    pub easting: f64,
    /// Northing coordinate in metres.
    pub northing: f64,
    /// Ellipsoidal height in metres.
    pub height: f64,
    /// Vertical displacement: baseline height minus current height.
    pub subsidence: f64,
    /// First difference of subsidence per elapsed day.
    pub velocity: f64,
    /// First difference of velocity per elapsed day.
    pub acceleration: f64,
    /// `velocity * 365` — annualised subsidence rate.
    pub yearly_rate: f64,
    /// Optional environmental covariates (temperature, precipitation,
    /// groundwater level, ...), carried through unchanged from ingestion.
    pub covariates: Vec<f64>,
}

// =============================================================================
// Risk Types
// =============================================================================

/// Coarse severity category derived from the forecasted yearly subsidence
/// rate. Totally ordered by severity: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Negligible movement.
    Low,
    /// Noticeable movement, monitoring advised.
    Medium,
    /// Significant movement.
    High,
    /// Severe movement requiring intervention.
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Configurable band boundaries for the risk classifier.
///
/// The `high` and `critical` comparisons are strict (`>`): a rate magnitude
/// exactly on one of those boundaries falls into the lower-severity band.
/// The `medium` boundary is inclusive, so a rate exactly at `medium` is
/// already [`RiskLevel::Medium`]. Local deployments replace the generic
/// metre-scale defaults with their own calibration (see
/// [`RiskThresholds::padang`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Rates above this magnitude are at least [`RiskLevel::Medium`].
    pub medium: f64,
    /// Rates above this magnitude are at least [`RiskLevel::High`].
    pub high: f64,
    /// Rates above this magnitude are [`RiskLevel::Critical`].
    pub critical: f64,
}

impl RiskThresholds {
    /// Creates validated thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 <= medium < high < critical` and all values
    /// are finite.
    pub fn new(medium: f64, high: f64, critical: f64) -> CoreResult<Self> {
        if !(medium.is_finite() && high.is_finite() && critical.is_finite()) {
            return Err(CoreError::validation(
                "risk thresholds must be finite".to_string(),
            ));
        }
        if medium < 0.0 || medium >= high || high >= critical {
            return Err(CoreError::validation(format!(
                "risk thresholds must satisfy 0 <= medium < high < critical, \
                 got {medium} / {high} / {critical}"
            )));
        }
        Ok(Self { medium, high, critical })
    }

    /// The Padang cm-scale local calibration (0.015 / 0.02 / 0.03 m/yr).
    #[must_use]
    pub fn padang() -> Self {
        Self { medium: 0.015, high: 0.02, critical: 0.03 }
    }

    /// Classifies a yearly subsidence rate into a [`RiskLevel`].
    ///
    /// The sign of the rate is ignored: classification uses `|yearly_rate|`.
    #[must_use]
    pub fn classify(&self, yearly_rate: f64) -> RiskLevel {
        let r = yearly_rate.abs();
        if r > self.critical {
            RiskLevel::Critical
        } else if r > self.high {
            RiskLevel::High
        } else if r >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl Default for RiskThresholds {
    /// The generic metre-scale calibration (0.1 / 0.3 / 0.5 m/yr).
    fn default() -> Self {
        Self { medium: 0.1, high: 0.3, critical: 0.5 }
    }
}

// =============================================================================
// Result Types
// =============================================================================

/// Horizontal position of a station in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Easting coordinate in metres.
    pub easting: f64,
    /// Northing coordinate in metres.
    pub northing: f64,
}

/// One forecast for one evaluated sequence, with its risk classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Station the sequence belongs to.
    pub station: StationId,
    /// Timestamp of the target record.
    pub timestamp: DateTime<Utc>,
    /// Observed subsidence of the target record.
    pub actual_subsidence: f64,
    /// Forecasted subsidence.
    pub predicted_subsidence: f64,
    /// Bootstrap confidence in `[0, 1]` attached by the evaluator.
    pub confidence: f64,
    /// Risk category of the forecasted yearly rate.
    pub risk_level: RiskLevel,
    /// Horizontal position of the station.
    pub location: Location,
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Category of a recoverable data-quality finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A coordinate field was NaN or infinite; the record was dropped.
    NonFiniteCoordinate,
    /// Derived subsidence magnitude exceeded the configured bound; the record
    /// was dropped.
    SubsidenceOutlier,
    /// Fewer valid records than `sequence_length + 1`; the station was
    /// excluded from training.
    InsufficientHistory,
    /// Two consecutive records are further apart than the maximum allowed
    /// gap; the sequence window was restarted.
    ExcessiveGap,
    /// A region received zero sequences; its fusion weight is forced to zero.
    EmptyRegion,
}

/// A recoverable data-quality warning collected alongside pipeline output.
///
/// Diagnostics never abort the pipeline; callers decide how to surface them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// What was found.
    pub kind: DiagnosticKind,
    /// Station the finding relates to, when applicable.
    pub station: Option<StationId>,
    /// Human-readable context.
    pub message: String,
}

impl Diagnostic {
    /// Creates a diagnostic tied to a station.
    #[must_use]
    pub fn for_station(
        kind: DiagnosticKind,
        station: StationId,
        message: impl Into<String>,
    ) -> Self {
        Self { kind, station: Some(station), message: message.into() }
    }

    /// Creates a diagnostic not tied to any station.
    #[must_use]
    pub fn global(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { kind, station: None, message: message.into() }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn classify_boundary_semantics() {
        let t = RiskThresholds::default();
        // Medium lower bound is inclusive; high/critical boundaries are strict,
        // so a value exactly on them falls into the lower-severity band.
        assert_eq!(t.classify(0.1), RiskLevel::Medium);
        assert_eq!(t.classify(0.3), RiskLevel::Medium);
        assert_eq!(t.classify(0.5), RiskLevel::High);
        assert_eq!(t.classify(0.50001), RiskLevel::Critical);
        assert_eq!(t.classify(0.05), RiskLevel::Low);
        assert_eq!(t.classify(0.4), RiskLevel::High);
    }

    #[test]
    fn classify_ignores_sign() {
        let t = RiskThresholds::default();
        assert_eq!(t.classify(-0.4), t.classify(0.4));
        assert_eq!(t.classify(-0.6), RiskLevel::Critical);
    }

    #[test]
    fn thresholds_reject_unordered_bands() {
        assert!(RiskThresholds::new(0.3, 0.1, 0.5).is_err());
        assert!(RiskThresholds::new(0.1, 0.1, 0.5).is_err());
        assert!(RiskThresholds::new(-0.1, 0.3, 0.5).is_err());
        assert!(RiskThresholds::new(0.1, 0.3, 0.5).is_ok());
    }

    #[test]
    fn padang_calibration_is_cm_scale() {
        let t = RiskThresholds::padang();
        assert_eq!(t.classify(0.025), RiskLevel::High);
        assert_eq!(t.classify(0.05), RiskLevel::Critical);
        assert_eq!(t.classify(0.01), RiskLevel::Low);
    }

    #[test]
    fn observation_finiteness() {
        let mut obs = Observation {
            timestamp: Utc::now(),
            easting: 754123.2,
            northing: 9893541.8,
            height: 12.43,
            geoid_separation: 22.1,
        };
        assert!(obs.is_finite());
        obs.height = f64::NAN;
        assert!(!obs.is_finite());
    }

    #[test]
    fn risk_level_serializes_lowercase() {
        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
