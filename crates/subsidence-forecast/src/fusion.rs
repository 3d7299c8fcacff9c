//! Attention fusion of regional forecasts.
//!
//! The fuser holds one learned score per region and combines the N regional
//! forecasts into a single prediction:
//!
//! ```text
//! w = softmax(scores)          (masked)
//! Y = sum_i  w_i * y_i
//! ```
//!
//! Regions that received zero sequences are masked: their score is treated
//! as negative infinity before the softmax, so their weight is exactly zero
//! and they can never contribute NaN. The softmax subtracts the running
//! maximum for numerical stability; the active weights always sum to 1.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Learned softmax attention over regional predictor outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionFuser {
    /// Raw per-region scores (pre-softmax).
    pub scores: Array1<f64>,
    /// Regions eligible for weight; inactive regions are pinned to zero.
    active: Vec<bool>,
}

impl AttentionFuser {
    /// Create a fuser with uniform scores over the given activity mask.
    ///
    /// # Panics
    ///
    /// Panics when `active` contains no active region.
    #[must_use]
    pub fn new(active: Vec<bool>) -> Self {
        assert!(
            active.iter().any(|&a| a),
            "at least one region must hold sequences"
        );
        let scores = Array1::zeros(active.len());
        AttentionFuser { scores, active }
    }

    /// Number of regions (active or not).
    #[must_use]
    pub fn num_regions(&self) -> usize {
        self.active.len()
    }

    /// Activity mask used for masking.
    #[must_use]
    pub fn active(&self) -> &[bool] {
        &self.active
    }

    /// Softmax weights over the active regions; inactive regions get exactly
    /// `0.0`. The returned weights sum to 1 within floating tolerance.
    #[must_use]
    pub fn weights(&self) -> Array1<f64> {
        let n = self.active.len();
        let max = self
            .scores
            .iter()
            .zip(&self.active)
            .filter(|(_, &a)| a)
            .map(|(&s, _)| s)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut w = Array1::<f64>::zeros(n);
        let mut denom = 0.0;
        for k in 0..n {
            if self.active[k] {
                let e = (self.scores[k] - max).exp();
                w[k] = e;
                denom += e;
            }
        }
        w.mapv_inplace(|v| v / denom);
        w
    }

    /// Fuse per-region forecasts into one prediction.
    ///
    /// # Panics
    ///
    /// Panics when `region_outputs` does not match the region count.
    #[must_use]
    pub fn fuse(&self, region_outputs: &[f64]) -> f64 {
        assert_eq!(region_outputs.len(), self.active.len());
        let w = self.weights();
        // Inactive regions are skipped outright, not multiplied by zero:
        // 0.0 * NaN would still poison the sum.
        (0..self.active.len())
            .filter(|&k| self.active[k])
            .map(|k| w[k] * region_outputs[k])
            .sum()
    }

    /// Gradient of the fused output with respect to the raw scores, for the
    /// given region outputs:
    ///
    /// ```text
    /// dY/ds_k = w_k * (y_k - Y)
    /// ```
    ///
    /// Inactive regions receive zero gradient.
    #[must_use]
    pub fn score_grad(&self, region_outputs: &[f64]) -> Array1<f64> {
        let w = self.weights();
        let fused = self.fuse(region_outputs);
        let mut grad = Array1::zeros(self.active.len());
        for k in 0..self.active.len() {
            if self.active[k] {
                grad[k] = w[k] * (region_outputs[k] - fused);
            }
        }
        grad
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
