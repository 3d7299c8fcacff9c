//! Spatial region partitioning.
//!
//! Stations (not individual sequences) are assigned to one of
//! `parallel_regions` regions by an FNV-1a hash of the station identifier
//! modulo the region count. The assignment is a pure function of station
//! identity and configuration: the same station always lands in the same
//! region across training and inference, which keeps the fusion weights
//! (indexed by region) meaningful across runs.
//!
//! When `parallel_regions` exceeds the number of distinct stations, the
//! excess regions receive zero sequences; they are reported as
//! [`DiagnosticKind::EmptyRegion`] diagnostics and their fusion weight is
//! forced to zero downstream, never NaN.

use tracing::debug;

use subsidence_core::{Diagnostic, DiagnosticKind, StationId};

use crate::dataset::SequenceDataset;

/// Stable station-to-region assignment for one configuration.
#[derive(Debug, Clone)]
pub struct RegionAssignment {
    num_regions: usize,
    /// Region index per sequence, parallel to the dataset order.
    sequence_regions: Vec<usize>,
    /// Number of sequences assigned to each region.
    counts: Vec<usize>,
}

impl RegionAssignment {
    /// Partition every sequence of `dataset` into `num_regions` regions.
    #[must_use]
    pub fn build(dataset: &SequenceDataset, num_regions: usize) -> (Self, Vec<Diagnostic>) {
        assert!(num_regions > 0, "num_regions must be > 0");

        let mut counts = vec![0usize; num_regions];
        let mut sequence_regions = Vec::with_capacity(dataset.len());
        for seq in dataset.sequences() {
            let region = region_of(&seq.station, num_regions);
            counts[region] += 1;
            sequence_regions.push(region);
        }

        let mut diagnostics = Vec::new();
        for (region, &count) in counts.iter().enumerate() {
            debug!(region, sequences = count, "region assignment");
            if count == 0 {
                diagnostics.push(Diagnostic::global(
                    DiagnosticKind::EmptyRegion,
                    format!("region {region} received zero sequences; fusion weight forced to 0"),
                ));
            }
        }

        (
            RegionAssignment { num_regions, sequence_regions, counts },
            diagnostics,
        )
    }

    /// Number of configured regions.
    #[must_use]
    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    /// Region of the sequence at dataset index `idx`.
    #[must_use]
    pub fn region_of_sequence(&self, idx: usize) -> usize {
        self.sequence_regions[idx]
    }

    /// Per-region sequence counts.
    #[must_use]
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Mask of regions that received at least one sequence.
    #[must_use]
    pub fn active_mask(&self) -> Vec<bool> {
        self.counts.iter().map(|&c| c > 0).collect()
    }
}

/// Pure station-to-region function: FNV-1a over the station identifier,
/// reduced modulo the region count.
#[must_use]
pub fn region_of(station: &StationId, num_regions: usize) -> usize {
    (fnv1a(station.as_str().as_bytes()) % num_regions as u64) as usize
}

/// 64-bit FNV-1a hash. Chosen over `DefaultHasher` because its output is
/// specified and stable across Rust versions and platforms.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
