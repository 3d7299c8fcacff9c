//! # Land-Subsidence Forecasting Pipeline
//!
//! This crate provides the complete training and inference pipeline for
//! regional land-subsidence forecasting from GNSS station time series. It
//! includes configuration management, data cleaning and feature derivation,
//! sliding-window sequencing, spatial region partitioning, per-region
//! recurrent predictors fused by learned attention, the training loop
//! orchestrator, and hold-out evaluation with bootstrap confidence.
//!
//! ## Architecture
//!
//! ```text
//! ModelConfig ──► Trainer ──► TrainedModel
//!      │             │
//!      │        features::clean / features::derive
//!      │             │
//!      │        SequenceDataset ──► RegionAssignment
//!      │             │                    │
//!      │        BatchIter          RegionalPredictor (xN, rayon)
//!      │                                  │
//!      │                           AttentionFuser
//!      │                                  │
//!      └──► eval::evaluate ◄── fused forecast ──► RiskThresholds
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use subsidence_core::{Observation, StationId, StationSeries};
//! use subsidence_forecast::{ModelConfig, Trainer};
//!
//! let config = ModelConfig::default();
//! let trainer = Trainer::new(config).expect("config is valid");
//!
//! let batches: Vec<StationSeries> = load_stations();
//! let outcome = trainer.train(&batches).expect("training succeeds");
//! println!("{}", outcome.metrics.summary());
//! # fn load_stations() -> Vec<StationSeries> { Vec::new() }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod features;
pub mod fusion;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod region;
pub mod trainer;

// Convenient re-exports at the crate root.
pub use config::ModelConfig;
pub use dataset::{BatchIter, Normalizer, Sequence, SequenceDataset};
pub use error::{ConfigError, DataError, ForecastError, ForecastResult};
pub use eval::{BootstrapConfidence, EvaluationReport};
pub use fusion::AttentionFuser;
pub use metrics::{EpochMetric, ModelMetrics};
pub use model::RegionalPredictor;
pub use region::RegionAssignment;
pub use trainer::{ProgressEvent, TrainOutcome, TrainedModel, Trainer, TrainingStatus};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
