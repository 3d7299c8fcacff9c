//! Adam optimizer and gradient utilities.
//!
//! The trainer flattens every trainable parameter of the run — all regional
//! predictors plus the fusion scores — into one contiguous vector; [`Adam`]
//! keeps its first/second-moment state aligned with that vector. The learning
//! rate follows a step schedule: it is multiplied by a decay factor every
//! fixed number of epochs.

/// Adam optimizer state over a flat parameter vector.
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Adam {
    /// Create optimizer state for `num_params` parameters with the standard
    /// Adam moments (beta1 = 0.9, beta2 = 0.999).
    #[must_use]
    pub fn new(num_params: usize) -> Self {
        Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
            t: 0,
        }
    }

    /// Apply one bias-corrected Adam update in place.
    ///
    /// # Panics
    ///
    /// Panics when `params` and `grads` disagree with the state length.
    pub fn step(&mut self, params: &mut [f64], grads: &[f64], learning_rate: f64) {
        assert_eq!(params.len(), self.m.len(), "parameter length mismatch");
        assert_eq!(grads.len(), self.m.len(), "gradient length mismatch");

        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for k in 0..params.len() {
            let g = grads[k];
            self.m[k] = self.beta1 * self.m[k] + (1.0 - self.beta1) * g;
            self.v[k] = self.beta2 * self.v[k] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[k] / bc1;
            let v_hat = self.v[k] / bc2;
            params[k] -= learning_rate * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Learning rate in effect for a 1-based epoch under step decay.
#[must_use]
pub fn scheduled_learning_rate(
    base: f64,
    epoch: usize,
    decay_every: usize,
    gamma: f64,
) -> f64 {
    let decays = (epoch - 1) / decay_every;
    base * gamma.powi(decays as i32)
}

/// Rescale `grads` in place so their global L2 norm does not exceed
/// `max_norm`. Returns the pre-clip norm.
pub fn clip_global_norm(grads: &mut [f64], max_norm: f64) -> f64 {
    let norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            *g *= scale;
        }
    }
    norm
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn adam_descends_a_quadratic() {
        // Minimise f(x) = (x - 3)^2 from x = 0.
        let mut params = vec![0.0_f64];
        let mut adam = Adam::new(1);
        for _ in 0..2000 {
            let grad = vec![2.0 * (params[0] - 3.0)];
            adam.step(&mut params, &grad, 0.05);
        }
        assert_abs_diff_eq!(params[0], 3.0, epsilon = 1e-3);
    }

    #[test]
    fn adam_is_deterministic() {
        let grads = vec![0.3, -0.7, 1.1];
        let mut p1 = vec![0.0; 3];
        let mut p2 = vec![0.0; 3];
        let mut a1 = Adam::new(3);
        let mut a2 = Adam::new(3);
        for _ in 0..10 {
            a1.step(&mut p1, &grads, 0.01);
            a2.step(&mut p2, &grads, 0.01);
        }
        assert_eq!(p1, p2);
    }

    #[test]
    fn schedule_decays_every_n_epochs() {
        let base = 0.001;
        assert_abs_diff_eq!(scheduled_learning_rate(base, 1, 10, 0.5), 0.001);
        assert_abs_diff_eq!(scheduled_learning_rate(base, 10, 10, 0.5), 0.001);
        assert_abs_diff_eq!(scheduled_learning_rate(base, 11, 10, 0.5), 0.0005);
        assert_abs_diff_eq!(scheduled_learning_rate(base, 21, 10, 0.5), 0.00025);
    }

    #[test]
    fn clipping_preserves_direction() {
        let mut grads = vec![3.0, 4.0]; // norm 5
        let pre = clip_global_norm(&mut grads, 1.0);
        assert_abs_diff_eq!(pre, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grads[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(grads[1], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn clipping_leaves_small_gradients_alone() {
        let mut grads = vec![0.3, 0.4];
        clip_global_norm(&mut grads, 1.0);
        assert_eq!(grads, vec![0.3, 0.4]);
    }
}
