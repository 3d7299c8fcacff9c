//! Integration tests for [`subsidence_forecast::config`].
//!
//! All tests are deterministic: they use only fixed values and the
//! `ModelConfig::default()` constructor.

use subsidence_forecast::{ConfigError, ModelConfig};
use tempfile::tempdir;

// ---------------------------------------------------------------------------
// Default config invariants
// ---------------------------------------------------------------------------

/// The default configuration must pass its own validation.
#[test]
fn default_config_is_valid() {
    let cfg = ModelConfig::default();
    cfg.validate().expect("default ModelConfig must be valid");
}

/// Every numeric field in the default config must be strictly positive where
/// the domain requires it.
#[test]
fn default_config_all_positive_fields() {
    let cfg = ModelConfig::default();

    assert!(cfg.layers > 0, "layers must be > 0");
    assert!(cfg.neurons > 0, "neurons must be > 0");
    assert!(cfg.epochs > 0, "epochs must be > 0");
    assert!(cfg.batch_size > 0, "batch_size must be > 0");
    assert!(cfg.learning_rate > 0.0, "learning_rate must be > 0.0");
    assert!(cfg.l2_weight >= 0.0, "l2_weight must be >= 0.0");
    assert!(cfg.grad_clip_norm > 0.0, "grad_clip_norm must be > 0.0");
    assert!(cfg.patience > 0, "patience must be > 0");
    assert!(cfg.sequence_length > 0, "sequence_length must be > 0");
    assert!(cfg.parallel_regions > 0, "parallel_regions must be > 0");
    assert!(cfg.max_gap_days > 0.0, "max_gap_days must be > 0.0");
    assert!(cfg.bootstrap_samples > 0, "bootstrap_samples must be > 0");
}

/// The default risk thresholds must be strictly ordered.
#[test]
fn default_risk_thresholds_are_ordered() {
    let cfg = ModelConfig::default();
    let t = &cfg.risk_thresholds;
    assert!(
        0.0 <= t.medium && t.medium < t.high && t.high < t.critical,
        "thresholds must satisfy 0 <= medium < high < critical"
    );
}

// ---------------------------------------------------------------------------
// Validation error reporting
// ---------------------------------------------------------------------------

/// Validation must name the offending field.
#[test]
fn validation_error_names_the_field() {
    let cfg = ModelConfig { epochs: 5, ..ModelConfig::default() };
    match cfg.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "epochs"),
        other => panic!("expected InvalidValue for epochs, got {other:?}"),
    }
}

/// Only the first violation is reported; validation stops there.
#[test]
fn first_violation_wins() {
    let cfg = ModelConfig {
        layers: 0,
        neurons: 1,
        ..ModelConfig::default()
    };
    match cfg.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "layers"),
        other => panic!("expected InvalidValue for layers, got {other:?}"),
    }
}

/// Unordered risk thresholds are a configuration error.
#[test]
fn unordered_risk_thresholds_are_rejected() {
    let mut cfg = ModelConfig::default();
    cfg.risk_thresholds.high = cfg.risk_thresholds.critical + 1.0;
    match cfg.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "risk_thresholds");
        }
        other => panic!("expected InvalidValue for risk_thresholds, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

/// A missing config file is a `FileAccess` error, not a panic.
#[test]
fn missing_file_is_file_access_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("does-not-exist.json");
    match ModelConfig::from_json(&path) {
        Err(ConfigError::FileAccess { .. }) => {}
        other => panic!("expected FileAccess, got {other:?}"),
    }
}

/// Malformed JSON is a `Parse` error carrying the path.
#[test]
fn malformed_json_is_parse_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    match ModelConfig::from_json(&path) {
        Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Parse, got {other:?}"),
    }
}

/// A stored config with an out-of-range field fails validation on load.
#[test]
fn out_of_range_stored_config_is_rejected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("config.json");

    let bad = ModelConfig { batch_size: 4, ..ModelConfig::default() };
    // to_json does not validate; the file round-trips the raw values.
    bad.to_json(&path).unwrap();

    match ModelConfig::from_json(&path) {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "batch_size"),
        other => panic!("expected InvalidValue for batch_size, got {other:?}"),
    }
}
