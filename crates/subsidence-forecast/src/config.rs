//! Training configuration for the subsidence forecasting pipeline.
//!
//! [`ModelConfig`] is the single source of truth for all hyper-parameters,
//! data-preparation bounds, and reproducibility settings used throughout the
//! pipeline. It is serializable via [`serde`] so it can be stored inside the
//! trained-model artifact and restored for inference.
//!
//! A configuration is validated once, before any computation starts, and is
//! treated as immutable for the duration of the run.
//!
//! # Example
//!
//! ```rust
//! use subsidence_forecast::config::ModelConfig;
//!
//! let cfg = ModelConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.sequence_length, 30);
//! assert_eq!(cfg.parallel_regions, 4);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use subsidence_core::{RiskThresholds, DEFAULT_MAX_ABS_SUBSIDENCE};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Complete configuration for one training or inference run.
///
/// All fields have documented defaults. Use [`ModelConfig::default()`] as a
/// starting point, then override individual fields as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------
    /// Number of stacked recurrent layers per regional predictor.
    /// Valid range `[1, 10]`. Default: **2**.
    pub layers: usize,

    /// Hidden units per recurrent layer. Valid range `[32, 512]`.
    /// Default: **64**.
    pub neurons: usize,

    /// Dropout rate applied between stacked layers during training only.
    /// Valid range `[0.0, 0.8]`. Default: **0.2**.
    pub dropout_rate: f64,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Total number of training epochs. Valid range `[10, 1000]`.
    /// Default: **50**.
    pub epochs: usize,

    /// Mini-batch size. Valid range `[8, 256]`. Default: **32**.
    pub batch_size: usize,

    /// Initial learning rate for the Adam optimiser.
    /// Valid range `[0.0001, 0.1]`. Default: **0.001**.
    pub learning_rate: f64,

    /// L2 regularisation coefficient added to the MSE loss. Default: **1e-4**.
    pub l2_weight: f64,

    /// The learning rate is multiplied by [`lr_decay_gamma`] every this many
    /// epochs. Default: **10**.
    ///
    /// [`lr_decay_gamma`]: ModelConfig::lr_decay_gamma
    pub lr_decay_every: usize,

    /// Multiplicative learning-rate decay factor. Default: **0.5**.
    pub lr_decay_gamma: f64,

    /// Maximum global gradient L2 norm; gradients are rescaled above it.
    /// Default: **5.0**.
    pub grad_clip_norm: f64,

    /// Stop training if validation loss does not improve for this many
    /// consecutive epochs. Default: **10**.
    pub patience: usize,

    // -----------------------------------------------------------------------
    // Data preparation
    // -----------------------------------------------------------------------
    /// Sliding-window context length in records. Valid range `[7, 365]`.
    /// Default: **30**.
    pub sequence_length: usize,

    /// Number of spatial regions (and regional predictors).
    /// Valid range `[1, 20]`. Default: **4**.
    pub parallel_regions: usize,

    /// Temporal hold-out fraction used for validation.
    /// Valid range `[0.1, 0.4]`. Default: **0.2**.
    pub validation_split: f64,

    /// Maximum allowed gap in days between consecutive records of one
    /// sequence; a larger gap restarts the window. Default: **30.0**.
    pub max_gap_days: f64,

    /// Records whose derived subsidence magnitude exceeds this bound are
    /// dropped as coordinate-noise spikes. Default: **100.0**.
    pub max_abs_subsidence: f64,

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------
    /// Bootstrap resamples used for per-prediction confidence.
    /// Default: **1000**.
    pub bootstrap_samples: usize,

    /// Confidence level for the bootstrap interval. Default: **0.95**.
    pub confidence_level: f64,

    /// Risk band boundaries applied to forecasted yearly rates.
    pub risk_thresholds: RiskThresholds,

    // -----------------------------------------------------------------------
    // Reproducibility
    // -----------------------------------------------------------------------
    /// Global random seed for every RNG source in the pipeline: parameter
    /// initialisation, the per-epoch shuffle, dropout masks, and bootstrap
    /// resampling. Default: **42**.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            // Network
            layers: 2,
            neurons: 64,
            dropout_rate: 0.2,
            // Optimisation
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            l2_weight: 1e-4,
            lr_decay_every: 10,
            lr_decay_gamma: 0.5,
            grad_clip_norm: 5.0,
            patience: 10,
            // Data preparation
            sequence_length: 30,
            parallel_regions: 4,
            validation_split: 0.2,
            max_gap_days: 30.0,
            max_abs_subsidence: DEFAULT_MAX_ABS_SUBSIDENCE,
            // Evaluation
            bootstrap_samples: 1000,
            confidence_level: 0.95,
            risk_thresholds: RiskThresholds::default(),
            // Reproducibility
            seed: 42,
        }
    }
}

impl ModelConfig {
    /// Load a [`ModelConfig`] from a JSON file at `path` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileAccess`] if the file cannot be opened,
    /// [`ConfigError::Parse`] if the JSON is malformed, and
    /// [`ConfigError::InvalidValue`] if a field is out of range.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ModelConfig = serde_json::from_str(&contents).map_err(|source| {
            ConfigError::Parse { path: path.to_path_buf(), source }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON at `path`,
    /// creating parent directories if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileAccess`] if the directory cannot be created
    /// or the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileAccess {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    ///
    /// # Validated ranges
    ///
    /// - `layers` in `[1, 10]`
    /// - `neurons` in `[32, 512]`
    /// - `epochs` in `[10, 1000]`
    /// - `batch_size` in `[8, 256]`
    /// - `learning_rate` in `[0.0001, 0.1]`
    /// - `parallel_regions` in `[1, 20]`
    /// - `sequence_length` in `[7, 365]`
    /// - `dropout_rate` in `[0.0, 0.8]`
    /// - `validation_split` in `[0.1, 0.4]`
    ///
    /// plus coherence of the ambient fields (decay factor in `(0, 1)`, strictly
    /// positive clip norm and gap bound, ordered risk thresholds, ...).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.layers) {
            return Err(ConfigError::invalid_value("layers", "must be in [1, 10]"));
        }
        if !(32..=512).contains(&self.neurons) {
            return Err(ConfigError::invalid_value("neurons", "must be in [32, 512]"));
        }
        if !(10..=1000).contains(&self.epochs) {
            return Err(ConfigError::invalid_value("epochs", "must be in [10, 1000]"));
        }
        if !(8..=256).contains(&self.batch_size) {
            return Err(ConfigError::invalid_value("batch_size", "must be in [8, 256]"));
        }
        if !(0.0001..=0.1).contains(&self.learning_rate) {
            return Err(ConfigError::invalid_value(
                "learning_rate",
                "must be in [0.0001, 0.1]",
            ));
        }
        if !(1..=20).contains(&self.parallel_regions) {
            return Err(ConfigError::invalid_value(
                "parallel_regions",
                "must be in [1, 20]",
            ));
        }
        if !(7..=365).contains(&self.sequence_length) {
            return Err(ConfigError::invalid_value(
                "sequence_length",
                "must be in [7, 365]",
            ));
        }
        if !(0.0..=0.8).contains(&self.dropout_rate) {
            return Err(ConfigError::invalid_value(
                "dropout_rate",
                "must be in [0.0, 0.8]",
            ));
        }
        if !(0.1..=0.4).contains(&self.validation_split) {
            return Err(ConfigError::invalid_value(
                "validation_split",
                "must be in [0.1, 0.4]",
            ));
        }

        // Ambient optimisation knobs.
        if self.l2_weight < 0.0 {
            return Err(ConfigError::invalid_value("l2_weight", "must be >= 0.0"));
        }
        if self.lr_decay_every == 0 {
            return Err(ConfigError::invalid_value("lr_decay_every", "must be > 0"));
        }
        if self.lr_decay_gamma <= 0.0 || self.lr_decay_gamma >= 1.0 {
            return Err(ConfigError::invalid_value(
                "lr_decay_gamma",
                "must be in (0.0, 1.0)",
            ));
        }
        if self.grad_clip_norm <= 0.0 {
            return Err(ConfigError::invalid_value("grad_clip_norm", "must be > 0.0"));
        }
        if self.patience == 0 {
            return Err(ConfigError::invalid_value("patience", "must be > 0"));
        }

        // Data-preparation bounds.
        if self.max_gap_days <= 0.0 {
            return Err(ConfigError::invalid_value("max_gap_days", "must be > 0.0"));
        }
        if self.max_abs_subsidence <= 0.0 {
            return Err(ConfigError::invalid_value(
                "max_abs_subsidence",
                "must be > 0.0",
            ));
        }

        // Evaluation.
        if self.bootstrap_samples == 0 {
            return Err(ConfigError::invalid_value("bootstrap_samples", "must be > 0"));
        }
        if self.confidence_level <= 0.0 || self.confidence_level >= 1.0 {
            return Err(ConfigError::invalid_value(
                "confidence_level",
                "must be in (0.0, 1.0)",
            ));
        }
        let t = &self.risk_thresholds;
        if RiskThresholds::new(t.medium, t.high, t.critical).is_err() {
            return Err(ConfigError::invalid_value(
                "risk_thresholds",
                "must satisfy 0 <= medium < high < critical",
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let cfg = ModelConfig::default();
        cfg.validate().expect("default config should be valid");
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let original = ModelConfig::default();
        original.to_json(&path).expect("serialization should succeed");

        let loaded = ModelConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded.layers, original.layers);
        assert_eq!(loaded.neurons, original.neurons);
        assert_eq!(loaded.seed, original.seed);
        assert_eq!(loaded.sequence_length, original.sequence_length);
        assert!((loaded.validation_split - original.validation_split).abs() < 1e-12);
    }

    #[test]
    fn zero_layers_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.layers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn too_many_layers_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.layers = 11;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn neurons_below_range_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.neurons = 16;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn learning_rate_bounds() {
        let mut cfg = ModelConfig::default();
        cfg.learning_rate = 0.2;
        assert!(cfg.validate().is_err());
        cfg.learning_rate = 0.00001;
        assert!(cfg.validate().is_err());
        cfg.learning_rate = 0.0001;
        assert!(cfg.validate().is_ok());
        cfg.learning_rate = 0.1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sequence_length_bounds() {
        let mut cfg = ModelConfig::default();
        cfg.sequence_length = 6;
        assert!(cfg.validate().is_err());
        cfg.sequence_length = 7;
        assert!(cfg.validate().is_ok());
        cfg.sequence_length = 365;
        assert!(cfg.validate().is_ok());
        cfg.sequence_length = 366;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_split_bounds() {
        let mut cfg = ModelConfig::default();
        cfg.validation_split = 0.05;
        assert!(cfg.validate().is_err());
        cfg.validation_split = 0.5;
        assert!(cfg.validate().is_err());
        cfg.validation_split = 0.4;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dropout_upper_bound() {
        let mut cfg = ModelConfig::default();
        cfg.dropout_rate = 0.8;
        assert!(cfg.validate().is_ok());
        cfg.dropout_rate = 0.81;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn decay_gamma_must_be_fractional() {
        let mut cfg = ModelConfig::default();
        cfg.lr_decay_gamma = 1.0;
        assert!(cfg.validate().is_err());
        cfg.lr_decay_gamma = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unordered_risk_thresholds_are_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.risk_thresholds = RiskThresholds { medium: 0.5, high: 0.3, critical: 0.1 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_fields_have_expected_defaults() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.layers, 2);
        assert_eq!(cfg.neurons, 64);
        assert_eq!(cfg.epochs, 50);
        assert_eq!(cfg.batch_size, 32);
        assert!((cfg.learning_rate - 1e-3).abs() < 1e-12);
        assert_eq!(cfg.parallel_regions, 4);
        assert_eq!(cfg.sequence_length, 30);
        assert!((cfg.dropout_rate - 0.2).abs() < 1e-12);
        assert!((cfg.validation_split - 0.2).abs() < 1e-12);
        assert_eq!(cfg.lr_decay_every, 10);
        assert_eq!(cfg.bootstrap_samples, 1000);
        assert!((cfg.confidence_level - 0.95).abs() < 1e-12);
        assert_eq!(cfg.seed, 42);
    }
}
