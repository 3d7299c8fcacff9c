//! Training orchestration.
//!
//! [`Trainer`] drives the full pipeline for one run: clean each station
//! series, derive kinematic features, cut sliding-window sequences, partition
//! them into spatial regions, fit the normalizer on the temporal training
//! split, then run mini-batch gradient descent over the regional predictors
//! and the fusion scores jointly.
//!
//! Every trainable parameter of the run lives in one flat vector — the
//! regional predictors in region order, the fusion scores last — so a single
//! [`Adam`] instance and one global-norm clip cover the whole model. Regional
//! forward and backward passes run in parallel over regions via `rayon`; the
//! fusion step is the per-batch synchronisation point, since the fused
//! gradient needs every regional output.
//!
//! The run is deterministic given the configuration and input data: parameter
//! initialisation, the per-epoch shuffle, dropout masks, and region
//! assignment all derive from `config.seed`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use subsidence_core::{Diagnostic, PredictionResult, StationSeries};

use crate::config::ModelConfig;
use crate::dataset::{Normalizer, BatchIter, SequenceDataset};
use crate::error::{ForecastError, ForecastResult};
use crate::eval::{self, accuracy_tolerance, within_tolerance_fraction};
use crate::features::{clean, derive, FeatureSeries};
use crate::fusion::AttentionFuser;
use crate::metrics::{EpochMetric, ModelMetrics};
use crate::model::{PredictorGrad, RegionalPredictor};
use crate::optim::{clip_global_norm, scheduled_learning_rate, Adam};
use crate::region::RegionAssignment;

// ---------------------------------------------------------------------------
// Progress and status
// ---------------------------------------------------------------------------

/// Progress notification emitted during training.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A mini-batch finished.
    Batch {
        /// 1-based epoch number.
        epoch: usize,
        /// 1-based batch number within the epoch.
        batch: usize,
        /// Total batches in this epoch.
        num_batches: usize,
        /// Training loss of this batch.
        loss: f64,
    },
    /// An epoch finished.
    Epoch(EpochMetric),
}

/// How a training run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    /// All configured epochs ran.
    Completed,
    /// Validation loss stalled for `patience` consecutive epochs.
    EarlyStopped {
        /// Epoch after which training stopped.
        epoch: usize,
    },
    /// The cancellation flag was observed at a batch boundary.
    Cancelled {
        /// Epoch in which cancellation was observed.
        epoch: usize,
    },
}

/// Everything a completed (or cancelled) run produces.
#[derive(Debug)]
pub struct TrainOutcome {
    /// The trained model, restored to its best-validation parameters.
    pub model: TrainedModel,
    /// Aggregated run metrics plus the per-epoch log.
    pub metrics: ModelMetrics,
    /// Held-out predictions with confidence and risk bands.
    pub predictions: Vec<PredictionResult>,
    /// How the run ended.
    pub status: TrainingStatus,
    /// Data-quality findings collected across the pipeline.
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// TrainedModel
// ---------------------------------------------------------------------------

/// A serializable trained model artifact.
///
/// Carries everything inference needs: the configuration (so region
/// assignment and sequence cutting reproduce exactly), the fitted
/// normalizer, the regional predictors, the fusion scores, and the pool of
/// validation residuals backing the bootstrap confidence estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Configuration the model was trained under.
    pub config: ModelConfig,
    /// Z-score statistics fitted on the training split.
    pub normalizer: Normalizer,
    /// One predictor per region, indexed by region.
    pub predictors: Vec<RegionalPredictor>,
    /// Learned attention over regional outputs.
    pub fuser: AttentionFuser,
    /// Validation residuals (denormalised) sampled by the bootstrap.
    pub residual_pool: Vec<f64>,
    /// When training finished.
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    /// Fused forecast for one raw context window, in raw subsidence units.
    #[must_use]
    pub fn forecast(&self, context: &Array2<f64>) -> f64 {
        let normalized = self.normalizer.apply(context);
        let active = self.fuser.active();
        let outputs: Vec<f64> = self
            .predictors
            .iter()
            .enumerate()
            .map(|(r, p)| {
                if active[r] {
                    p.forward(&normalized, None).output
                } else {
                    0.0
                }
            })
            .collect();
        let fused = self.fuser.fuse(&outputs);
        fused * self.normalizer.std[0] + self.normalizer.mean[0]
    }

    /// Run the full inference pipeline over fresh station batches and return
    /// per-sequence predictions with confidence and risk bands.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::Data`] for structurally malformed batches and
    /// [`ForecastError::EmptyDataset`] when no sequence can be formed.
    pub fn predict(
        &self,
        batches: &[StationSeries],
    ) -> ForecastResult<(Vec<PredictionResult>, Vec<Diagnostic>)> {
        let (dataset, diagnostics) = assemble_dataset(batches, &[], &self.config)?;
        if dataset.input_dim() != self.normalizer.mean.len() {
            return Err(crate::error::DataError::FeatureWidthMismatch {
                expected: self.normalizer.mean.len(),
                got: dataset.input_dim(),
            }
            .into());
        }
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let predictions = eval::predict_indices(self, &dataset, &indices);
        Ok((predictions, diagnostics))
    }

    /// Serialize this model as pretty-printed JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::Artifact`] when the file cannot be written.
    pub fn save(&self, path: &Path) -> ForecastResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ForecastError::artifact(e.to_string(), parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| ForecastError::artifact(e.to_string(), path))?;
        info!(path = %path.display(), "saved model artifact");
        Ok(())
    }

    /// Load a model artifact previously written by [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::Artifact`] when the file cannot be read and
    /// [`ForecastError::Json`] when it does not parse.
    pub fn load(path: &Path) -> ForecastResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::artifact(e.to_string(), path))?;
        let model: TrainedModel = serde_json::from_str(&contents)?;
        model.config.validate()?;
        Ok(model)
    }
}

// ---------------------------------------------------------------------------
// Pipeline assembly
// ---------------------------------------------------------------------------

/// Clean, derive, and sequence a set of station batches under `config`.
///
/// `covariates` is parallel to `batches` (empty means no covariates); rows
/// attach positionally to the cleaned observations of each station.
fn assemble_dataset(
    batches: &[StationSeries],
    covariates: &[Vec<Vec<f64>>],
    config: &ModelConfig,
) -> ForecastResult<(SequenceDataset, Vec<Diagnostic>)> {
    let mut diagnostics = Vec::new();
    let mut feature_series: Vec<FeatureSeries> = Vec::with_capacity(batches.len());

    for (i, series) in batches.iter().enumerate() {
        let (kept, mut diags) = clean(series, config)?;
        diagnostics.append(&mut diags);
        let station_covariates = covariates.get(i).map_or(&[][..], Vec::as_slice);
        feature_series.push(derive(&series.station, &kept, station_covariates));
    }

    let (dataset, mut diags) = SequenceDataset::build(
        &feature_series,
        config.sequence_length,
        config.max_gap_days,
    );
    diagnostics.append(&mut diags);

    if dataset.is_empty() {
        return Err(ForecastError::EmptyDataset);
    }
    Ok((dataset, diagnostics))
}

// ---------------------------------------------------------------------------
// Flat parameter plumbing
// ---------------------------------------------------------------------------

fn gather_params(predictors: &[RegionalPredictor], fuser: &AttentionFuser) -> Vec<f64> {
    let mut flat = Vec::new();
    for p in predictors {
        flat.extend(p.to_flat());
    }
    flat.extend(fuser.scores.iter());
    flat
}

fn scatter_params(
    flat: &[f64],
    predictors: &mut [RegionalPredictor],
    fuser: &mut AttentionFuser,
) {
    let mut offset = 0usize;
    for p in predictors.iter_mut() {
        let n = p.num_params();
        p.assign_flat(&flat[offset..offset + n]);
        offset += n;
    }
    for (k, v) in fuser.scores.iter_mut().enumerate() {
        *v = flat[offset + k];
    }
}

fn gather_grads(
    predictors: &[RegionalPredictor],
    region_grads: &[Option<PredictorGrad>],
    score_grad: &Array1<f64>,
) -> Vec<f64> {
    let mut flat = Vec::new();
    for (p, g) in predictors.iter().zip(region_grads) {
        match g {
            Some(g) => flat.extend(g.to_flat()),
            None => flat.extend(std::iter::repeat(0.0).take(p.num_params())),
        }
    }
    flat.extend(score_grad.iter());
    flat
}

/// Deterministic per-(epoch, batch, region) dropout seed.
fn dropout_seed(seed: u64, epoch: usize, batch: usize, region: usize) -> u64 {
    seed.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add((epoch as u64) << 40)
        .wrapping_add((batch as u64) << 16)
        .wrapping_add(region as u64)
}

/// Fused forecasts (normalized space) for a set of contexts, no dropout.
/// Regions run in parallel; inactive regions are skipped.
pub(crate) fn fused_forward(
    predictors: &[RegionalPredictor],
    fuser: &AttentionFuser,
    contexts: &[Array2<f64>],
) -> Vec<f64> {
    let active = fuser.active();
    let per_region: Vec<Option<Vec<f64>>> = predictors
        .par_iter()
        .enumerate()
        .map(|(r, p)| {
            if !active[r] {
                return None;
            }
            Some(contexts.iter().map(|c| p.forward(c, None).output).collect())
        })
        .collect();

    (0..contexts.len())
        .map(|j| {
            let outputs: Vec<f64> = per_region
                .iter()
                .map(|region| region.as_ref().map_or(0.0, |v| v[j]))
                .collect();
            fuser.fuse(&outputs)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Orchestrates one training run end to end.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: ModelConfig,
}

impl Trainer {
    /// Create a trainer for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ForecastError::Config`] when the configuration is out of
    /// range.
    pub fn new(config: ModelConfig) -> ForecastResult<Self> {
        config.validate()?;
        Ok(Trainer { config })
    }

    /// The configuration this trainer runs under.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Train on the given station batches with no covariates, no
    /// cancellation, and no progress reporting.
    ///
    /// # Errors
    ///
    /// See [`Self::train_with`].
    pub fn train(&self, batches: &[StationSeries]) -> ForecastResult<TrainOutcome> {
        self.train_with(batches, &[], None, |_| {})
    }

    /// Train with the full set of hooks.
    ///
    /// `covariates` is parallel to `batches` (pass `&[]` for none). The
    /// cancellation flag is checked at every batch boundary; when observed,
    /// the run stops and returns the best model seen so far with
    /// [`TrainingStatus::Cancelled`]. `on_progress` fires after every batch
    /// and every epoch.
    ///
    /// # Errors
    ///
    /// - [`ForecastError::Data`] for structurally malformed batches.
    /// - [`ForecastError::EmptyDataset`] when no sequence survives cleaning.
    /// - [`ForecastError::Divergence`] when the loss becomes non-finite;
    ///   metrics for completed epochs ride along in the error.
    pub fn train_with<F>(
        &self,
        batches: &[StationSeries],
        covariates: &[Vec<Vec<f64>>],
        cancel: Option<&AtomicBool>,
        mut on_progress: F,
    ) -> ForecastResult<TrainOutcome>
    where
        F: FnMut(&ProgressEvent),
    {
        let config = &self.config;
        let (dataset, mut diagnostics) = assemble_dataset(batches, covariates, config)?;

        let (train_idx, mut val_idx) = dataset.temporal_split(config.validation_split);
        if val_idx.is_empty() {
            // Too few sequences for a hold-out; validate on the training
            // split so the epoch loop still has a stopping signal.
            warn!("validation split is empty; validating on the training split");
            val_idx = train_idx.clone();
        }

        let (assignment, mut region_diags) =
            RegionAssignment::build(&dataset, config.parallel_regions);
        diagnostics.append(&mut region_diags);

        let normalizer = Normalizer::fit(&dataset, &train_idx);

        let mut predictors: Vec<RegionalPredictor> = (0..config.parallel_regions)
            .map(|r| {
                let mut rng = SmallRng::seed_from_u64(config.seed.wrapping_add(r as u64));
                RegionalPredictor::new(dataset.input_dim(), config.neurons, config.layers, &mut rng)
            })
            .collect();
        let mut fuser = AttentionFuser::new(assignment.active_mask());

        info!(
            sequences = dataset.len(),
            train = train_idx.len(),
            validation = val_idx.len(),
            regions = config.parallel_regions,
            active_regions = assignment.counts().iter().filter(|&&c| c > 0).count(),
            input_dim = dataset.input_dim(),
            "training run assembled"
        );

        // Pre-normalise every context once; training touches them repeatedly.
        let contexts: Vec<Array2<f64>> = dataset
            .sequences()
            .iter()
            .map(|s| normalizer.apply(&s.context))
            .collect();
        // Targets in normalized (column 0) space.
        let targets: Vec<f64> = dataset
            .sequences()
            .iter()
            .map(|s| (s.target_subsidence() - normalizer.mean[0]) / normalizer.std[0])
            .collect();
        let raw_targets: Vec<f64> = dataset
            .sequences()
            .iter()
            .map(crate::dataset::Sequence::target_subsidence)
            .collect();
        let val_raw_targets: Vec<f64> = val_idx.iter().map(|&i| raw_targets[i]).collect();
        let tolerance = accuracy_tolerance(&val_raw_targets);

        let mut params = gather_params(&predictors, &fuser);
        let mut adam = Adam::new(params.len());

        let mut epoch_metrics: Vec<EpochMetric> = Vec::with_capacity(config.epochs);
        let mut best_val = f64::INFINITY;
        let mut best_params = params.clone();
        let mut stall = 0usize;
        let mut status = TrainingStatus::Completed;

        'epochs: for epoch in 1..=config.epochs {
            let epoch_start = Instant::now();
            let lr = scheduled_learning_rate(
                config.learning_rate,
                epoch,
                config.lr_decay_every,
                config.lr_decay_gamma,
            );

            let batch_iter =
                BatchIter::new(&train_idx, config.batch_size, config.seed ^ epoch as u64);
            let num_batches = batch_iter.num_batches();
            let mut epoch_loss_sum = 0.0;

            for (batch_no, batch) in batch_iter.enumerate() {
                if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                    warn!(epoch, "cancellation observed at batch boundary");
                    status = TrainingStatus::Cancelled { epoch };
                    break 'epochs;
                }

                let loss = self.train_batch(
                    &mut predictors,
                    &mut fuser,
                    &mut params,
                    &mut adam,
                    &contexts,
                    &targets,
                    &batch,
                    epoch,
                    batch_no,
                    lr,
                );
                if !loss.is_finite() {
                    warn!(epoch, batch = batch_no + 1, "loss became non-finite");
                    return Err(ForecastError::divergence(epoch, epoch_metrics));
                }
                epoch_loss_sum += loss;

                on_progress(&ProgressEvent::Batch {
                    epoch,
                    batch: batch_no + 1,
                    num_batches,
                    loss,
                });
            }

            // Validation pass, dropout off.
            let val_contexts: Vec<Array2<f64>> =
                val_idx.iter().map(|&i| contexts[i].clone()).collect();
            let val_outputs = fused_forward(&predictors, &fuser, &val_contexts);
            let val_loss = val_idx
                .iter()
                .zip(&val_outputs)
                .map(|(&i, &y)| (y - targets[i]) * (y - targets[i]))
                .sum::<f64>()
                / val_idx.len() as f64;
            let val_raw: Vec<f64> = val_outputs
                .iter()
                .map(|&y| y * normalizer.std[0] + normalizer.mean[0])
                .collect();
            let accuracy = within_tolerance_fraction(&val_raw, &val_raw_targets, tolerance);

            let metric = EpochMetric {
                epoch,
                training_loss: epoch_loss_sum / num_batches.max(1) as f64,
                validation_loss: val_loss,
                accuracy,
                learning_rate: lr,
                duration_ms: epoch_start.elapsed().as_millis() as u64,
            };
            info!(
                epoch,
                training_loss = metric.training_loss,
                validation_loss = metric.validation_loss,
                accuracy = metric.accuracy,
                learning_rate = lr,
                "epoch complete"
            );
            on_progress(&ProgressEvent::Epoch(metric.clone()));
            epoch_metrics.push(metric);

            if val_loss < best_val {
                best_val = val_loss;
                best_params = params.clone();
                stall = 0;
            } else {
                stall += 1;
                if stall >= config.patience {
                    info!(epoch, patience = config.patience, "early stopping");
                    status = TrainingStatus::EarlyStopped { epoch };
                    break;
                }
            }
        }

        // Restore the best-validation parameters before evaluating.
        scatter_params(&best_params, &mut predictors, &mut fuser);

        let mut model = TrainedModel {
            config: config.clone(),
            normalizer,
            predictors,
            fuser,
            residual_pool: Vec::new(),
            trained_at: Utc::now(),
        };

        // Residual pool on the hold-out, in raw units, backs the bootstrap.
        let val_contexts: Vec<Array2<f64>> =
            val_idx.iter().map(|&i| contexts[i].clone()).collect();
        model.residual_pool = fused_forward(&model.predictors, &model.fuser, &val_contexts)
            .iter()
            .zip(&val_raw_targets)
            .map(|(&y, &t)| y * model.normalizer.std[0] + model.normalizer.mean[0] - t)
            .collect();

        let report = eval::evaluate(&model, &dataset, &val_idx);
        let metrics = ModelMetrics::new(
            report.mse,
            report.mae,
            report.accuracy,
            report.r2,
            epoch_metrics,
        );
        info!(summary = %metrics.summary(), "training finished");

        Ok(TrainOutcome {
            model,
            metrics,
            predictions: report.predictions,
            status,
            diagnostics,
        })
    }

    /// Run one mini-batch: parallel regional forward, fused loss, parallel
    /// regional backward, global clip, Adam step. Returns the batch loss.
    #[allow(clippy::too_many_arguments)]
    fn train_batch(
        &self,
        predictors: &mut Vec<RegionalPredictor>,
        fuser: &mut AttentionFuser,
        params: &mut Vec<f64>,
        adam: &mut Adam,
        contexts: &[Array2<f64>],
        targets: &[f64],
        batch: &[usize],
        epoch: usize,
        batch_no: usize,
        lr: f64,
    ) -> f64 {
        let config = &self.config;
        let active: Vec<bool> = fuser.active().to_vec();
        let num_regions = predictors.len();
        let batch_len = batch.len();

        // Forward, parallel over regions, with per-region seeded dropout.
        let passes: Vec<Option<Vec<crate::model::ForwardPass>>> = (0..num_regions)
            .into_par_iter()
            .map(|r| {
                if !active[r] {
                    return None;
                }
                let mut rng = SmallRng::seed_from_u64(dropout_seed(
                    config.seed,
                    epoch,
                    batch_no,
                    r,
                ));
                Some(
                    batch
                        .iter()
                        .map(|&i| {
                            predictors[r]
                                .forward(&contexts[i], Some((config.dropout_rate, &mut rng)))
                        })
                        .collect(),
                )
            })
            .collect();

        // Fuse and differentiate the loss, sequence by sequence.
        let weights = fuser.weights();
        let mut sq_err_sum = 0.0;
        let mut d_fused = vec![0.0; batch_len];
        let mut score_grad = Array1::<f64>::zeros(num_regions);

        for (j, &i) in batch.iter().enumerate() {
            let outputs: Vec<f64> = (0..num_regions)
                .map(|r| passes[r].as_ref().map_or(0.0, |p| p[j].output))
                .collect();
            let fused = fuser.fuse(&outputs);
            let err = fused - targets[i];
            sq_err_sum += err * err;
            d_fused[j] = 2.0 * err / batch_len as f64;
            score_grad += &(fuser.score_grad(&outputs) * d_fused[j]);
        }

        // Backward, parallel over regions: dLoss/dy_r = dLoss/dY * w_r.
        let region_grads: Vec<Option<PredictorGrad>> = (0..num_regions)
            .into_par_iter()
            .map(|r| {
                let region_passes = passes[r].as_ref()?;
                let mut grad = PredictorGrad::zeros(&predictors[r]);
                for (j, pass) in region_passes.iter().enumerate() {
                    let d = d_fused[j] * weights[r];
                    if d != 0.0 {
                        grad.add_assign(&predictors[r].backward(pass, d));
                    }
                }
                Some(grad)
            })
            .collect();

        let mut grads = gather_grads(predictors, &region_grads, &score_grad);

        // L2 term: loss += l2 * |theta|^2, so grad += 2 * l2 * theta.
        let mut l2_term = 0.0;
        if config.l2_weight > 0.0 {
            for (g, p) in grads.iter_mut().zip(params.iter()) {
                *g += 2.0 * config.l2_weight * p;
                l2_term += p * p;
            }
            l2_term *= config.l2_weight;
        }

        clip_global_norm(&mut grads, config.grad_clip_norm);
        adam.step(params, &grads, lr);
        scatter_params(params, predictors, fuser);

        sq_err_sum / batch_len as f64 + l2_term
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
