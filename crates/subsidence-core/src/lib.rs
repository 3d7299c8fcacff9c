//! # Subsidence Core
//!
//! Core types for the land-subsidence monitoring system.
//!
//! This crate provides the data shapes exchanged between the forecasting
//! pipeline and its external collaborators (ingestion, persistence, UI):
//!
//! - **Observation Types**: [`StationId`], [`Observation`], [`StationSeries`]
//!   for raw positional records per station.
//!
//! - **Feature Types**: [`FeatureRecord`] — an observation augmented with the
//!   derived kinematic features (subsidence, velocity, acceleration, yearly
//!   rate).
//!
//! - **Risk Model**: [`RiskLevel`] and the configurable [`RiskThresholds`]
//!   that map a forecasted yearly rate to a severity category.
//!
//! - **Results**: [`PredictionResult`] — one forecast with confidence and
//!   risk label per evaluated sequence.
//!
//! - **Diagnostics**: [`Diagnostic`] — the recoverable data-quality warning
//!   channel returned alongside pipeline output, never thrown.
//!
//! ## Example
//!
//! ```rust
//! use subsidence_core::{RiskLevel, RiskThresholds};
//!
//! let thresholds = RiskThresholds::default();
//! assert_eq!(thresholds.classify(0.50001), RiskLevel::Critical);
//! assert_eq!(thresholds.classify(0.5), RiskLevel::High);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod types;

// Re-export commonly used types at the crate root.
pub use error::{CoreError, CoreResult};
pub use types::{
    Diagnostic, DiagnosticKind, FeatureRecord, Location, Observation, PredictionResult,
    RiskLevel, RiskThresholds, StationId, StationSeries,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bound on derived subsidence magnitude; observations beyond it are
/// treated as coordinate-noise spikes and dropped by the cleaner.
pub const DEFAULT_MAX_ABS_SUBSIDENCE: f64 = 100.0;

/// Days in a year used to annualise the per-day velocity.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Prelude module for convenient imports.
///
/// ```rust
/// use subsidence_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::types::{
        Diagnostic, DiagnosticKind, FeatureRecord, Location, Observation,
        PredictionResult, RiskLevel, RiskThresholds, StationId, StationSeries,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_valid() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn constants() {
        assert!(DEFAULT_MAX_ABS_SUBSIDENCE > 0.0);
        assert_eq!(DAYS_PER_YEAR, 365.0);
    }
}
