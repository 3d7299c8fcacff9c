//! Error types for the forecasting pipeline.
//!
//! This module is the single source of truth for all error types in the
//! crate. Every module that produces an error imports its error type from
//! here rather than defining it inline, keeping the hierarchy centralised.
//!
//! ## Hierarchy
//!
//! ```text
//! ForecastError (top-level)
//! ├── ConfigError   (range validation / file loading — fatal pre-flight)
//! └── DataError     (malformed ingestion batches)
//! ```
//!
//! Recoverable per-record findings are *not* errors: the cleaner, deriver and
//! sequencer report them through the collected
//! [`Diagnostic`](subsidence_core::Diagnostic) list returned alongside their
//! output. A region with zero sequences is likewise handled by forcing its
//! fusion weight to zero, not by failing.

use std::path::PathBuf;
use thiserror::Error;

use crate::metrics::EpochMetric;

/// Convenient `Result` alias used by orchestration-level functions.
pub type ForecastResult<T> = Result<T, ForecastError>;

// ---------------------------------------------------------------------------
// ForecastError — top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for training and inference calls.
///
/// Orchestration-level functions (e.g. [`crate::trainer::Trainer`] methods)
/// return `ForecastResult<T>`. Lower-level functions in [`crate::config`]
/// return [`ConfigError`], which coerces via [`From`].
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A malformed ingestion batch.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No station survived cleaning with enough history to form a sequence.
    #[error("No usable sequences: every station was excluded during cleaning")]
    EmptyDataset,

    /// Loss became non-finite during an epoch.
    ///
    /// Fatal to the current run. Metrics for epochs completed before the
    /// divergence are preserved and carried in the error so callers can
    /// inspect the trajectory.
    #[error("Training diverged at epoch {epoch}: loss became non-finite")]
    Divergence {
        /// 1-based epoch in which the non-finite loss appeared.
        epoch: usize,
        /// Per-epoch metrics up to the last good epoch.
        completed: Vec<EpochMetric>,
    },

    /// A model artifact could not be saved or loaded.
    #[error("Artifact error: {message} (path: {path:?})")]
    Artifact {
        /// Human-readable description.
        message: String,
        /// Path that was being accessed.
        path: PathBuf,
    },
}

impl ForecastError {
    /// Construct a [`ForecastError::Divergence`].
    pub fn divergence(epoch: usize, completed: Vec<EpochMetric>) -> Self {
        ForecastError::Divergence { epoch, completed }
    }

    /// Construct a [`ForecastError::Artifact`].
    pub fn artifact<S: Into<String>>(msg: S, path: impl Into<PathBuf>) -> Self {
        ForecastError::Artifact { message: msg.into(), path: path.into() }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`ModelConfig`].
///
/// [`ModelConfig`]: crate::config::ModelConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field is outside its documented range.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read or written.
    #[error("Cannot access config file `{path}`: {source}")]
    FileAccess {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DataError
// ---------------------------------------------------------------------------

/// Errors produced for structurally unusable ingestion batches.
///
/// Per-record problems (non-finite coordinates, outliers) are diagnostics and
/// never raise a `DataError`; this type covers batches the pipeline cannot
/// even interpret, such as out-of-order timestamps within a station series.
#[derive(Debug, Error)]
pub enum DataError {
    /// A station's observations are not in ascending timestamp order.
    #[error("Station {station}: observations out of order at index {index}")]
    UnorderedSeries {
        /// Offending station identifier.
        station: String,
        /// Index of the first out-of-order observation.
        index: usize,
    },

    /// Two records in one series carry the same timestamp.
    #[error("Station {station}: duplicate timestamp at index {index}")]
    DuplicateTimestamp {
        /// Offending station identifier.
        station: String,
        /// Index of the duplicate observation.
        index: usize,
    },

    /// Inference batches produced a different feature width than the model
    /// was trained on (covariate mismatch).
    #[error("Feature width mismatch: model expects {expected}, batches produced {got}")]
    FeatureWidthMismatch {
        /// Width the model's normalizer was fitted for.
        expected: usize,
        /// Width derived from the supplied batches.
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_coerces_into_forecast_error() {
        let e: ForecastError = ConfigError::invalid_value("layers", "must be >= 1").into();
        assert!(matches!(e, ForecastError::Config(_)));
    }

    #[test]
    fn divergence_preserves_completed_epochs() {
        let completed = vec![EpochMetric {
            epoch: 1,
            training_loss: 0.5,
            validation_loss: 0.6,
            accuracy: 0.4,
            learning_rate: 0.001,
            duration_ms: 12,
        }];
        let e = ForecastError::divergence(2, completed);
        match e {
            ForecastError::Divergence { epoch, completed } => {
                assert_eq!(epoch, 2);
                assert_eq!(completed.len(), 1);
            }
            other => panic!("expected Divergence, got {other:?}"),
        }
    }

    #[test]
    fn error_messages_name_the_field() {
        let e = ConfigError::invalid_value("neurons", "must be in [32, 512]");
        assert!(e.to_string().contains("neurons"));
    }
}
