//! Regional recurrent predictor.
//!
//! One [`RegionalPredictor`] per spatial region: a stack of LSTM layers plus
//! a linear projection of the last hidden state to a scalar subsidence
//! forecast. The cell follows the standard gated update
//!
//! ```text
//! f_t = sigma(Wf [h_prev, x_t] + bf)        forget gate
//! i_t = sigma(Wi [h_prev, x_t] + bi)        input gate
//! g_t = tanh (Wg [h_prev, x_t] + bg)        candidate
//! c_t = f_t * c_prev + i_t * g_t            cell state
//! o_t = sigma(Wo [h_prev, x_t] + bo)        output gate
//! h_t = o_t * tanh(c_t)                     hidden state
//! ```
//!
//! with the four gates packed into one weight matrix per layer (row blocks in
//! f, i, g, o order). Inverted dropout is applied to the hidden state between
//! stacked layers during training only, with masks drawn from a seeded RNG so
//! the pass is deterministic given parameters, input, and seed.
//!
//! The forward pass caches every per-step activation; [`RegionalPredictor::
//! backward`] runs full backpropagation through time and depth from a scalar
//! output gradient, which is what lets the trainer run a real optimizer
//! instead of simulating convergence.

use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// One LSTM layer's parameters, gates packed in f/i/g/o row blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    /// Input weights, shape `(4 * hidden, input)`.
    pub w_x: Array2<f64>,
    /// Recurrent weights, shape `(4 * hidden, hidden)`.
    pub w_h: Array2<f64>,
    /// Gate biases, shape `(4 * hidden)`.
    pub b: Array1<f64>,
}

impl LstmLayer {
    fn new(input: usize, hidden: usize, rng: &mut SmallRng) -> Self {
        // Uniform init scaled by fan-in, forget-gate bias at 1.0 so early
        // training does not immediately wash out the cell state.
        let scale = 1.0 / ((input + hidden) as f64).sqrt();
        let mut w_x = Array2::zeros((4 * hidden, input));
        let mut w_h = Array2::zeros((4 * hidden, hidden));
        for v in w_x.iter_mut() {
            *v = rng.gen_range(-scale..scale);
        }
        for v in w_h.iter_mut() {
            *v = rng.gen_range(-scale..scale);
        }
        let mut b = Array1::zeros(4 * hidden);
        b.slice_mut(s![0..hidden]).fill(1.0);
        LstmLayer { w_x, w_h, b }
    }

    fn hidden(&self) -> usize {
        self.w_h.ncols()
    }
}

/// A stack of LSTM layers with a scalar output projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionalPredictor {
    /// Stacked layers, bottom first.
    pub layers: Vec<LstmLayer>,
    /// Output projection weights, shape `(hidden)`.
    pub w_out: Array1<f64>,
    /// Output projection bias.
    pub b_out: f64,
}

impl RegionalPredictor {
    /// Create a predictor with `num_layers` layers of `hidden` units over
    /// `input_dim`-wide feature rows, parameters drawn from `rng`.
    #[must_use]
    pub fn new(input_dim: usize, hidden: usize, num_layers: usize, rng: &mut SmallRng) -> Self {
        assert!(num_layers >= 1, "at least one layer required");
        let mut layers = Vec::with_capacity(num_layers);
        for l in 0..num_layers {
            let input = if l == 0 { input_dim } else { hidden };
            layers.push(LstmLayer::new(input, hidden, rng));
        }
        let scale = 1.0 / (hidden as f64).sqrt();
        let mut w_out = Array1::zeros(hidden);
        for v in w_out.iter_mut() {
            *v = rng.gen_range(-scale..scale);
        }
        RegionalPredictor { layers, w_out, b_out: 0.0 }
    }

    /// Hidden width of the stack.
    #[must_use]
    pub fn hidden(&self) -> usize {
        self.layers[0].hidden()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.w_x.len() + l.w_h.len() + l.b.len())
            .sum::<usize>()
            + self.w_out.len()
            + 1
    }

    // ------------------------------------------------------------------
    // Forward
    // ------------------------------------------------------------------

    /// Run the stack over a `(T, input_dim)` context and return the scalar
    /// forecast plus the activation cache needed by [`Self::backward`].
    ///
    /// `dropout` carries the rate and RNG during training; pass `None` at
    /// inference, where dropout is disabled.
    #[must_use]
    pub fn forward(
        &self,
        context: &Array2<f64>,
        dropout: Option<(f64, &mut SmallRng)>,
    ) -> ForwardPass {
        let steps = context.nrows();
        let hidden = self.hidden();
        let num_layers = self.layers.len();

        let (rate, mut rng) = match dropout {
            Some((rate, rng)) if rate > 0.0 && num_layers > 1 => (rate, Some(rng)),
            _ => (0.0, None),
        };

        let mut cache = ForwardPass {
            output: 0.0,
            last_hidden: Array1::zeros(hidden),
            steps: Vec::with_capacity(num_layers),
            masks: Vec::new(),
        };
        for _ in 0..num_layers {
            cache.steps.push(Vec::with_capacity(steps));
        }
        // One scaled mask per inter-layer boundary per timestep.
        for _ in 0..num_layers.saturating_sub(1) {
            cache.masks.push(Vec::with_capacity(steps));
        }

        let mut h = vec![Array1::<f64>::zeros(hidden); num_layers];
        let mut c = vec![Array1::<f64>::zeros(hidden); num_layers];

        for t in 0..steps {
            let mut x = context.row(t).to_owned();
            for (l, layer) in self.layers.iter().enumerate() {
                let step = lstm_step(layer, &x, &h[l], &c[l]);
                h[l] = step.h.clone();
                c[l] = step.c.clone();

                let mut next_input = step.h.clone();
                if l + 1 < num_layers {
                    // Inverted dropout: scale at train time so inference
                    // needs no correction.
                    let mask = match rng.as_deref_mut() {
                        Some(rng) => Array1::from_shape_fn(hidden, |_| {
                            if rng.gen::<f64>() < rate { 0.0 } else { 1.0 / (1.0 - rate) }
                        }),
                        None => Array1::ones(hidden),
                    };
                    next_input = &next_input * &mask;
                    cache.masks[l].push(mask);
                }
                cache.steps[l].push(step);
                x = next_input;
            }
        }

        cache.last_hidden = h[num_layers - 1].clone();
        cache.output = self.w_out.dot(&cache.last_hidden) + self.b_out;
        cache
    }

    // ------------------------------------------------------------------
    // Backward
    // ------------------------------------------------------------------

    /// Backpropagate a scalar output gradient through time and depth.
    ///
    /// `d_output` is `dLoss/dy` for the forecast produced by `pass`. The
    /// returned gradients accumulate nothing else; callers sum them over a
    /// batch and hand them to the optimizer.
    #[must_use]
    pub fn backward(&self, pass: &ForwardPass, d_output: f64) -> PredictorGrad {
        let num_layers = self.layers.len();
        let steps = pass.steps[0].len();
        let hidden = self.hidden();

        let mut grad = PredictorGrad::zeros(self);
        grad.w_out = &pass.last_hidden * d_output;
        grad.b_out = d_output;

        // dh_ext[l][t]: gradient arriving at layer l's hidden state at time t
        // from above (the output head or layer l + 1's input).
        let mut dh_ext: Vec<Vec<Array1<f64>>> =
            vec![vec![Array1::zeros(hidden); steps]; num_layers];
        dh_ext[num_layers - 1][steps - 1] = &self.w_out * d_output;

        for l in (0..num_layers).rev() {
            let layer = &self.layers[l];
            let mut dh_rec = Array1::<f64>::zeros(hidden);
            let mut dc_rec = Array1::<f64>::zeros(hidden);

            for t in (0..steps).rev() {
                let step = &pass.steps[l][t];
                let dh = &dh_ext[l][t] + &dh_rec;

                let one = 1.0;
                let d_o = &dh * &step.tanh_c;
                let dz_o = &d_o * &step.o * &step.o.mapv(|v| one - v);

                let mut dc = &dh * &step.o * &step.tanh_c.mapv(|v| one - v * v);
                dc += &dc_rec;

                let d_f = &dc * &step.c_prev;
                let dz_f = &d_f * &step.f * &step.f.mapv(|v| one - v);
                let d_i = &dc * &step.g;
                let dz_i = &d_i * &step.i * &step.i.mapv(|v| one - v);
                let d_g = &dc * &step.i;
                let dz_g = &d_g * &step.g.mapv(|v| one - v * v);

                let mut dz = Array1::<f64>::zeros(4 * hidden);
                dz.slice_mut(s![0..hidden]).assign(&dz_f);
                dz.slice_mut(s![hidden..2 * hidden]).assign(&dz_i);
                dz.slice_mut(s![2 * hidden..3 * hidden]).assign(&dz_g);
                dz.slice_mut(s![3 * hidden..4 * hidden]).assign(&dz_o);

                let dz_col = dz.view().insert_axis(Axis(1));
                grad.layers[l].w_x += &dz_col.dot(&step.x.view().insert_axis(Axis(0)));
                grad.layers[l].w_h += &dz_col.dot(&step.h_prev.view().insert_axis(Axis(0)));
                grad.layers[l].b += &dz;

                let dx = layer.w_x.t().dot(&dz);
                dh_rec = layer.w_h.t().dot(&dz);
                dc_rec = &dc * &step.f;

                if l > 0 {
                    // The input of layer l at time t is layer l-1's hidden
                    // state through the (scaled) dropout mask.
                    dh_ext[l - 1][t] = &dx * &pass.masks[l - 1][t];
                }
            }
        }

        grad
    }
}

/// Per-step activations cached by the forward pass.
#[derive(Debug, Clone)]
pub struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    f: Array1<f64>,
    i: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
    h: Array1<f64>,
    c: Array1<f64>,
}

/// Output of one forward pass, including everything backward needs.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// The scalar forecast.
    pub output: f64,
    /// Final hidden state of the top layer.
    pub last_hidden: Array1<f64>,
    steps: Vec<Vec<StepCache>>,
    masks: Vec<Vec<Array1<f64>>>,
}

fn lstm_step(
    layer: &LstmLayer,
    x: &Array1<f64>,
    h_prev: &Array1<f64>,
    c_prev: &Array1<f64>,
) -> StepCache {
    let hidden = layer.hidden();
    let z = layer.w_x.dot(x) + layer.w_h.dot(h_prev) + &layer.b;
    let f = z.slice(s![0..hidden]).mapv(sigmoid);
    let i = z.slice(s![hidden..2 * hidden]).mapv(sigmoid);
    let g = z.slice(s![2 * hidden..3 * hidden]).mapv(f64::tanh);
    let o = z.slice(s![3 * hidden..4 * hidden]).mapv(sigmoid);
    let c = &(&f * c_prev) + &(&i * &g);
    let tanh_c = c.mapv(f64::tanh);
    let h = &o * &tanh_c;
    StepCache {
        x: x.clone(),
        h_prev: h_prev.clone(),
        c_prev: c_prev.clone(),
        f,
        i,
        g,
        o,
        tanh_c,
        h,
        c,
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

// ---------------------------------------------------------------------------
// Gradients
// ---------------------------------------------------------------------------

/// Gradient of one layer, same shapes as [`LstmLayer`].
#[derive(Debug, Clone)]
pub struct LayerGrad {
    /// Gradient of [`LstmLayer::w_x`].
    pub w_x: Array2<f64>,
    /// Gradient of [`LstmLayer::w_h`].
    pub w_h: Array2<f64>,
    /// Gradient of [`LstmLayer::b`].
    pub b: Array1<f64>,
}

/// Gradient of a whole predictor, same shapes as [`RegionalPredictor`].
#[derive(Debug, Clone)]
pub struct PredictorGrad {
    /// Per-layer gradients, bottom first.
    pub layers: Vec<LayerGrad>,
    /// Gradient of the output projection weights.
    pub w_out: Array1<f64>,
    /// Gradient of the output projection bias.
    pub b_out: f64,
}

impl PredictorGrad {
    /// Zero gradients shaped like `model`.
    #[must_use]
    pub fn zeros(model: &RegionalPredictor) -> Self {
        PredictorGrad {
            layers: model
                .layers
                .iter()
                .map(|l| LayerGrad {
                    w_x: Array2::zeros(l.w_x.raw_dim()),
                    w_h: Array2::zeros(l.w_h.raw_dim()),
                    b: Array1::zeros(l.b.raw_dim()),
                })
                .collect(),
            w_out: Array1::zeros(model.w_out.raw_dim()),
            b_out: 0.0,
        }
    }

    /// Accumulate another gradient of identical shape.
    pub fn add_assign(&mut self, other: &PredictorGrad) {
        for (a, b) in self.layers.iter_mut().zip(&other.layers) {
            a.w_x += &b.w_x;
            a.w_h += &b.w_h;
            a.b += &b.b;
        }
        self.w_out += &other.w_out;
        self.b_out += other.b_out;
    }

    /// Scale every component, e.g. to average over a batch.
    pub fn scale(&mut self, factor: f64) {
        for l in &mut self.layers {
            l.w_x *= factor;
            l.w_h *= factor;
            l.b *= factor;
        }
        self.w_out *= factor;
        self.b_out *= factor;
    }
}

// ---------------------------------------------------------------------------
// Flat parameter views (optimizer interface)
// ---------------------------------------------------------------------------

impl RegionalPredictor {
    /// Copy all parameters into one flat vector (deterministic order).
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.num_params());
        for l in &self.layers {
            flat.extend(l.w_x.iter());
            flat.extend(l.w_h.iter());
            flat.extend(l.b.iter());
        }
        flat.extend(self.w_out.iter());
        flat.push(self.b_out);
        flat
    }

    /// Overwrite all parameters from a flat vector produced by
    /// [`Self::to_flat`] (or updated in place by the optimizer).
    ///
    /// # Panics
    ///
    /// Panics when `flat` has the wrong length.
    pub fn assign_flat(&mut self, flat: &[f64]) {
        assert_eq!(flat.len(), self.num_params(), "flat parameter length mismatch");
        let mut offset = 0usize;
        for l in &mut self.layers {
            for v in l.w_x.iter_mut() {
                *v = flat[offset];
                offset += 1;
            }
            for v in l.w_h.iter_mut() {
                *v = flat[offset];
                offset += 1;
            }
            for v in l.b.iter_mut() {
                *v = flat[offset];
                offset += 1;
            }
        }
        for v in self.w_out.iter_mut() {
            *v = flat[offset];
            offset += 1;
        }
        self.b_out = flat[offset];
    }
}

impl PredictorGrad {
    /// Flatten in the same order as [`RegionalPredictor::to_flat`].
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::new();
        for l in &self.layers {
            flat.extend(l.w_x.iter());
            flat.extend(l.w_h.iter());
            flat.extend(l.b.iter());
        }
        flat.extend(self.w_out.iter());
        flat.push(self.b_out);
        flat
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn tiny_model(layers: usize) -> RegionalPredictor {
        let mut rng = SmallRng::seed_from_u64(7);
        RegionalPredictor::new(3, 5, layers, &mut rng)
    }

    fn tiny_input() -> Array2<f64> {
        Array2::from_shape_fn((4, 3), |(t, d)| 0.1 * (t as f64 + 1.0) - 0.05 * d as f64)
    }

    #[test]
    fn forward_is_deterministic_without_dropout() {
        let model = tiny_model(2);
        let x = tiny_input();
        let a = model.forward(&x, None);
        let b = model.forward(&x, None);
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn forward_with_seeded_dropout_is_reproducible() {
        let model = tiny_model(3);
        let x = tiny_input();
        let mut rng_a = SmallRng::seed_from_u64(99);
        let mut rng_b = SmallRng::seed_from_u64(99);
        let a = model.forward(&x, Some((0.5, &mut rng_a)));
        let b = model.forward(&x, Some((0.5, &mut rng_b)));
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn dropout_disabled_at_inference_changes_nothing() {
        let model = tiny_model(2);
        let x = tiny_input();
        let mut rng = SmallRng::seed_from_u64(1);
        // Rate 0.0 must behave exactly like no dropout.
        let with_zero_rate = model.forward(&x, Some((0.0, &mut rng)));
        let without = model.forward(&x, None);
        assert_eq!(with_zero_rate.output, without.output);
    }

    #[test]
    fn forget_bias_initialised_to_one() {
        let model = tiny_model(1);
        let hidden = model.hidden();
        for v in model.layers[0].b.slice(s![0..hidden]).iter() {
            assert_eq!(*v, 1.0);
        }
    }

    #[test]
    fn param_count_matches_flat_length() {
        let model = tiny_model(2);
        assert_eq!(model.to_flat().len(), model.num_params());
    }

    #[test]
    fn flat_round_trip_preserves_output() {
        let model = tiny_model(2);
        let x = tiny_input();
        let before = model.forward(&x, None).output;

        let flat = model.to_flat();
        let mut rng = SmallRng::seed_from_u64(1234);
        let mut other = RegionalPredictor::new(3, 5, 2, &mut rng);
        other.assign_flat(&flat);
        let after = other.forward(&x, None).output;
        assert_abs_diff_eq!(before, after, epsilon = 1e-15);
    }

    /// Finite-difference check of the full BPTT gradient.
    ///
    /// Perturbs every parameter of a small two-layer stack and compares the
    /// centred difference of the loss `0.5 * y^2` against the analytic
    /// gradient `y * dy/dtheta` from `backward`.
    #[test]
    fn gradients_match_finite_differences() {
        let model = tiny_model(2);
        let x = tiny_input();

        let pass = model.forward(&x, None);
        let y = pass.output;
        let analytic = model.backward(&pass, y).to_flat();

        let flat = model.to_flat();
        let eps = 1e-6;
        for (idx, &g) in analytic.iter().enumerate() {
            let mut plus = flat.clone();
            plus[idx] += eps;
            let mut minus = flat.clone();
            minus[idx] -= eps;

            let mut m = model.clone();
            m.assign_flat(&plus);
            let y_plus = m.forward(&x, None).output;
            m.assign_flat(&minus);
            let y_minus = m.forward(&x, None).output;

            let numeric = (0.5 * y_plus * y_plus - 0.5 * y_minus * y_minus) / (2.0 * eps);
            assert_abs_diff_eq!(g, numeric, epsilon = 1e-4);
        }
    }

    #[test]
    fn grad_accumulation_and_scaling() {
        let model = tiny_model(1);
        let x = tiny_input();
        let pass = model.forward(&x, None);
        let g1 = model.backward(&pass, 1.0);

        let mut sum = PredictorGrad::zeros(&model);
        sum.add_assign(&g1);
        sum.add_assign(&g1);
        sum.scale(0.5);

        let sum_flat = sum.to_flat();
        for (a, b) in sum_flat.iter().zip(g1.to_flat().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }
}
