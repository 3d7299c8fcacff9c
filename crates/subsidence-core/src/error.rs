//! Error types for the core subsidence types.
//!
//! The forecasting pipeline crate defines its own, richer error hierarchy;
//! this module only covers invariant violations of the shared core types
//! themselves (e.g. unordered risk thresholds).

use thiserror::Error;

/// Convenient `Result` alias for core-type constructors.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by core-type validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value failed domain validation.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    /// Construct a [`CoreError::Validation`].
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        CoreError::Validation(msg.into())
    }
}
