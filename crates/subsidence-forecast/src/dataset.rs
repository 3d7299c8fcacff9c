//! Sequence construction and batched iteration.
//!
//! The sequencer turns each station's feature series into fixed-length
//! sliding-window sequences: context = `records[i-L..i-1]`, target =
//! `record[i]`, for every `i >= L`, never crossing station boundaries and
//! never spanning a sampling gap larger than the configured maximum. A
//! station with exactly `L` records yields zero sequences (one more record is
//! needed for the target).
//!
//! [`SequenceDataset`] owns the assembled sequences, provides the temporal
//! train/validation split (earliest fraction trains, remainder validates, so
//! no future information leaks into the past), and fits the z-score
//! [`Normalizer`] on the training split only.
//!
//! [`BatchIter`] yields index batches in a deterministic shuffled order: the
//! permutation comes from a seeded xorshift64 Fisher-Yates, so identical
//! seeds reproduce identical epochs on every platform.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use tracing::{debug, info};

use subsidence_core::{Diagnostic, DiagnosticKind, FeatureRecord, StationId};

use crate::features::FeatureSeries;

/// Number of kinematic features per record before covariates.
pub const KINEMATIC_FEATURES: usize = 4;

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// One fixed-length context window plus its next-step target.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Station this sequence was cut from.
    pub station: StationId,
    /// Raw (un-normalised) feature matrix, `sequence_length x input_dim`.
    /// Row layout: `[subsidence, velocity, acceleration, yearly_rate,
    /// covariates...]`.
    pub context: Array2<f64>,
    /// Timestamp of the first context row; together with the target
    /// timestamp it spans the trajectory a predicted yearly rate is
    /// estimated over.
    pub context_start: DateTime<Utc>,
    /// Timestamp of the last context row.
    pub context_end: DateTime<Utc>,
    /// The record immediately following the context in time.
    pub target: FeatureRecord,
}

impl Sequence {
    /// The target subsidence this sequence predicts.
    #[must_use]
    pub fn target_subsidence(&self) -> f64 {
        self.target.subsidence
    }
}

/// Feature-vector width for a series with `covariate_dim` covariates.
#[must_use]
pub fn input_dim(covariate_dim: usize) -> usize {
    KINEMATIC_FEATURES + covariate_dim
}

fn feature_row(record: &FeatureRecord, covariate_dim: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(input_dim(covariate_dim));
    row.push(record.subsidence);
    row.push(record.velocity);
    row.push(record.acceleration);
    row.push(record.yearly_rate);
    for c in 0..covariate_dim {
        row.push(record.covariates.get(c).copied().unwrap_or(0.0));
    }
    row
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Cut one station's feature series into sliding-window sequences.
///
/// Re-running over the same (immutable) series yields identical sequences.
/// Gaps larger than `max_gap_days` between consecutive records restart the
/// window; each distinct gap is reported once as an
/// [`DiagnosticKind::ExcessiveGap`] diagnostic.
#[must_use]
pub fn build_sequences(
    series: &FeatureSeries,
    sequence_length: usize,
    max_gap_days: f64,
    covariate_dim: usize,
) -> (Vec<Sequence>, Vec<Diagnostic>) {
    let n = series.records.len();
    let mut diagnostics = Vec::new();
    if n < sequence_length + 1 {
        return (Vec::new(), diagnostics);
    }

    // gap_prefix[j] = number of oversized gaps strictly before record j.
    let mut gap_prefix = vec![0usize; n];
    for j in 1..n {
        let dt_days = series.records[j]
            .timestamp
            .signed_duration_since(series.records[j - 1].timestamp)
            .num_milliseconds() as f64
            / 86_400_000.0;
        let oversized = dt_days > max_gap_days;
        gap_prefix[j] = gap_prefix[j - 1] + usize::from(oversized);
        if oversized {
            diagnostics.push(Diagnostic::for_station(
                DiagnosticKind::ExcessiveGap,
                series.station.clone(),
                format!("gap of {dt_days:.1} days before record {j} exceeds {max_gap_days:.1}"),
            ));
        }
    }

    let dim = input_dim(covariate_dim);
    let mut sequences = Vec::new();
    for i in sequence_length..n {
        // Window [i - L, i] is contiguous iff it contains no oversized gap.
        if gap_prefix[i] - gap_prefix[i - sequence_length] != 0 {
            continue;
        }
        let mut context = Array2::zeros((sequence_length, dim));
        for (r, record) in series.records[i - sequence_length..i].iter().enumerate() {
            for (c, v) in feature_row(record, covariate_dim).into_iter().enumerate() {
                context[[r, c]] = v;
            }
        }
        sequences.push(Sequence {
            station: series.station.clone(),
            context,
            context_start: series.records[i - sequence_length].timestamp,
            context_end: series.records[i - 1].timestamp,
            target: series.records[i].clone(),
        });
    }

    debug!(
        station = %series.station,
        records = n,
        sequences = sequences.len(),
        "built sliding-window sequences"
    );
    (sequences, diagnostics)
}

// ---------------------------------------------------------------------------
// SequenceDataset
// ---------------------------------------------------------------------------

/// All sequences of a run, ordered by target timestamp.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    sequences: Vec<Sequence>,
    input_dim: usize,
}

impl SequenceDataset {
    /// Assemble a dataset from per-station feature series.
    ///
    /// The covariate width is taken from the widest record observed so that
    /// stations without covariates are zero-padded to a common input width.
    #[must_use]
    pub fn build(
        series: &[FeatureSeries],
        sequence_length: usize,
        max_gap_days: f64,
    ) -> (Self, Vec<Diagnostic>) {
        let covariate_dim = series
            .iter()
            .flat_map(|s| s.records.iter())
            .map(|r| r.covariates.len())
            .max()
            .unwrap_or(0);

        let mut sequences = Vec::new();
        let mut diagnostics = Vec::new();
        for s in series {
            let (mut seqs, mut diags) =
                build_sequences(s, sequence_length, max_gap_days, covariate_dim);
            sequences.append(&mut seqs);
            diagnostics.append(&mut diags);
        }
        // Temporal order across stations; ties broken by station for
        // reproducibility.
        sequences.sort_by(|a, b| {
            (a.target.timestamp, &a.station).cmp(&(b.target.timestamp, &b.station))
        });

        info!(
            sequences = sequences.len(),
            input_dim = input_dim(covariate_dim),
            "assembled sequence dataset"
        );
        (
            SequenceDataset { sequences, input_dim: input_dim(covariate_dim) },
            diagnostics,
        )
    }

    /// Total number of sequences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Returns `true` when the dataset holds no sequences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Feature-vector width of every context row.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Access a sequence by index.
    #[must_use]
    pub fn get(&self, idx: usize) -> &Sequence {
        &self.sequences[idx]
    }

    /// All sequences in temporal order.
    #[must_use]
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    /// Split indices temporally: the earliest `1 - validation_split` fraction
    /// trains, the remainder validates.
    #[must_use]
    pub fn temporal_split(&self, validation_split: f64) -> (Vec<usize>, Vec<usize>) {
        let n = self.sequences.len();
        let train_len = ((1.0 - validation_split) * n as f64).round() as usize;
        let train_len = train_len.min(n);
        ((0..train_len).collect(), (train_len..n).collect())
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Per-feature z-score statistics, fitted on the training split only.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Normalizer {
    /// Per-column mean over the training contexts.
    pub mean: Array1<f64>,
    /// Per-column standard deviation; columns with zero variance keep 1.0 so
    /// normalisation never divides by zero.
    pub std: Array1<f64>,
}

impl Normalizer {
    /// Fit statistics over the context rows of the given sequence indices.
    #[must_use]
    pub fn fit(dataset: &SequenceDataset, indices: &[usize]) -> Self {
        let dim = dataset.input_dim();
        let mut mean = Array1::<f64>::zeros(dim);
        let mut count = 0usize;
        for &i in indices {
            for row in dataset.get(i).context.rows() {
                mean += &row;
                count += 1;
            }
        }
        if count > 0 {
            mean /= count as f64;
        }

        let mut var = Array1::<f64>::zeros(dim);
        for &i in indices {
            for row in dataset.get(i).context.rows() {
                let d = &row.to_owned() - &mean;
                var += &(&d * &d);
            }
        }
        if count > 0 {
            var /= count as f64;
        }
        let std = var.mapv(|v| {
            let s = v.sqrt();
            if s > 1e-12 { s } else { 1.0 }
        });

        Normalizer { mean, std }
    }

    /// Identity statistics for `dim` features.
    #[must_use]
    pub fn identity(dim: usize) -> Self {
        Normalizer { mean: Array1::zeros(dim), std: Array1::ones(dim) }
    }

    /// Z-score a raw context matrix.
    #[must_use]
    pub fn apply(&self, context: &Array2<f64>) -> Array2<f64> {
        let mut out = context.clone();
        for mut row in out.rows_mut() {
            row -= &self.mean;
            row /= &self.std;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// BatchIter
// ---------------------------------------------------------------------------

/// Deterministic shuffled batch iterator over sequence indices.
///
/// The permutation is produced by a seeded xorshift64 Fisher-Yates shuffle,
/// reproducible across platforms without any external RNG state.
pub struct BatchIter {
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl BatchIter {
    /// Create a shuffled iterator over `indices` with the given seed.
    #[must_use]
    pub fn new(indices: &[usize], batch_size: usize, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        let mut order = indices.to_vec();
        xorshift_shuffle(&mut order, seed);
        BatchIter { order, batch_size, cursor: 0 }
    }

    /// Number of batches this iterator will yield.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        if self.order.is_empty() {
            return 0;
        }
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }
}

impl Iterator for BatchIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(batch)
    }
}

/// In-place Fisher-Yates shuffle using a 64-bit xorshift PRNG seeded with
/// `seed`. Reproducible across platforms and requires no external crate in
/// production paths.
fn xorshift_shuffle(indices: &mut [usize], seed: u64) {
    let n = indices.len();
    if n <= 1 {
        return;
    }
    let mut state = if seed == 0 { 0x853c_49e6_748f_ea9b } else { seed };
    for i in (1..n).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        indices.swap(i, j);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
