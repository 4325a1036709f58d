//! Per-chunk negative binomial testing
//!
//! A worker turns one [`Chunk`] into a [`PartialResult`]: size factors and
//! dispersions are estimated from the chunk's own genes, then every gene is
//! tested between the two condition groups with the exact NB test.

use log::debug;
use ndarray::{ArrayView1, Axis};

use crate::conditions::{ConditionAssignment, Group};
use crate::dispersion::{estimate_chunk_dispersions, DispersionParams};
use crate::error::FitError;
use crate::normalization::{estimate_size_factors, normalize_counts, SizeFactorMethod};
use crate::partition::Chunk;
use crate::testing::{nbinom_exact_test, GroupTotals};

/// Test output for the genes of one chunk, row-aligned
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub chunk: usize,
    pub gene_ids: Vec<String>,
    pub base_means: Vec<f64>,
    pub means_a: Vec<f64>,
    pub means_b: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// meanB / meanA on the offset counts
    pub raw_fold_changes: Vec<f64>,
}

impl PartialResult {
    pub fn len(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gene_ids.is_empty()
    }

    /// Check that every column has one value per gene
    pub fn is_consistent(&self) -> bool {
        let n = self.gene_ids.len();
        [
            self.base_means.len(),
            self.means_a.len(),
            self.means_b.len(),
            self.pvalues.len(),
            self.raw_fold_changes.len(),
        ]
        .iter()
        .all(|&len| len == n)
    }
}

/// Read-only arguments shared by every chunk of a run
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Chunk columns belonging to group A
    pub a_cols: Vec<usize>,
    /// Chunk columns belonging to group B
    pub b_cols: Vec<usize>,
    pub dispersion: DispersionParams,
    pub size_factor_method: SizeFactorMethod,
}

impl TestContext {
    pub fn new(
        assignment: &ConditionAssignment,
        dispersion: DispersionParams,
        size_factor_method: SizeFactorMethod,
    ) -> Self {
        Self {
            a_cols: assignment.positions(Group::A),
            b_cols: assignment.positions(Group::B),
            dispersion,
            size_factor_method,
        }
    }
}

/// Something that can test one chunk
///
/// Implementations must be pure functions of their inputs; the dispatcher
/// calls them concurrently from the rayon pool.
pub trait ChunkTester: Sync {
    fn test_chunk(&self, chunk: &Chunk, ctx: &TestContext) -> Result<PartialResult, FitError>;
}

/// Exact negative binomial test between the two condition groups
#[derive(Debug, Clone, Copy, Default)]
pub struct NbinomWorker;

impl ChunkTester for NbinomWorker {
    fn test_chunk(&self, chunk: &Chunk, ctx: &TestContext) -> Result<PartialResult, FitError> {
        test_chunk_nbinom(chunk, ctx).map_err(|e| e.in_chunk(chunk.index()))
    }
}

fn group_totals(
    raw: ArrayView1<'_, f64>,
    size_factors: &[f64],
    cols: &[usize],
    dispersion: f64,
) -> GroupTotals {
    GroupTotals {
        count_sum: cols.iter().map(|&j| raw[j]).sum::<f64>().round() as u64,
        sf_sum: cols.iter().map(|&j| size_factors[j]).sum(),
        sf_sq_sum: cols.iter().map(|&j| size_factors[j].powi(2)).sum(),
        dispersion,
    }
}

fn mean_over(row: ArrayView1<'_, f64>, cols: &[usize]) -> f64 {
    cols.iter().map(|&j| row[j]).sum::<f64>() / cols.len() as f64
}

fn test_chunk_nbinom(chunk: &Chunk, ctx: &TestContext) -> Result<PartialResult, FitError> {
    let counts = chunk.counts();
    let size_factors = estimate_size_factors(counts, ctx.size_factor_method)?;
    debug!(
        "Chunk {}: size factors in [{:.3}, {:.3}]",
        chunk.index(),
        size_factors.iter().copied().fold(f64::INFINITY, f64::min),
        size_factors.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    );

    let normalized = normalize_counts(counts, &size_factors);
    let dispersions = estimate_chunk_dispersions(
        normalized.view(),
        &size_factors,
        &ctx.a_cols,
        &ctx.b_cols,
        &ctx.dispersion,
    )?;

    let sf = size_factors.to_vec();
    let all_cols: Vec<usize> = ctx.a_cols.iter().chain(ctx.b_cols.iter()).copied().collect();
    let n = chunk.n_genes();
    let mut result = PartialResult {
        chunk: chunk.index(),
        gene_ids: chunk.gene_ids().to_vec(),
        base_means: Vec::with_capacity(n),
        means_a: Vec::with_capacity(n),
        means_b: Vec::with_capacity(n),
        pvalues: Vec::with_capacity(n),
        raw_fold_changes: Vec::with_capacity(n),
    };

    for (i, (raw, norm)) in counts
        .axis_iter(Axis(0))
        .zip(normalized.axis_iter(Axis(0)))
        .enumerate()
    {
        let base_mean = mean_over(norm, &all_cols);
        let mean_a = mean_over(norm, &ctx.a_cols);
        let mean_b = mean_over(norm, &ctx.b_cols);

        let a = group_totals(raw, &sf, &ctx.a_cols, dispersions.get(Group::A)[i]);
        let b = group_totals(raw, &sf, &ctx.b_cols, dispersions.get(Group::B)[i]);

        result.base_means.push(base_mean);
        result.means_a.push(mean_a);
        result.means_b.push(mean_b);
        result.pvalues.push(nbinom_exact_test(&a, &b, base_mean));
        result.raw_fold_changes.push(mean_b / mean_a);
    }

    debug!("Chunk {}: tested {} genes", chunk.index(), n);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn context(n_a: usize, n_b: usize) -> TestContext {
        TestContext {
            a_cols: (0..n_a).collect(),
            b_cols: (n_a..n_a + n_b).collect(),
            dispersion: DispersionParams::default(),
            size_factor_method: SizeFactorMethod::Ratio,
        }
    }

    fn chunk_with_one_shifted_gene() -> Chunk {
        // 12 genes x 8 cells; gene 0 is 8x higher in group B
        let counts = Array2::from_shape_fn((12, 8), |(g, c)| {
            let base = 10.0 + 4.0 * g as f64;
            let noise = [0.3, 1.5, 0.8, 1.7, 0.5, 1.2, 1.0, 0.6][(3 * c + g) % 8];
            let shift = if g == 0 && c >= 4 { 8.0 } else { 1.0 };
            (base * noise * shift).round() + 1.0
        });
        let ids = (0..12).map(|g| format!("g{}", g)).collect();
        Chunk::new(2, ids, counts).unwrap()
    }

    #[test]
    fn test_worker_output_shape() {
        let chunk = chunk_with_one_shifted_gene();
        let partial = NbinomWorker.test_chunk(&chunk, &context(4, 4)).unwrap();
        assert_eq!(partial.chunk, 2);
        assert_eq!(partial.len(), 12);
        assert!(partial.is_consistent());
        assert!(partial.pvalues.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_shifted_gene_has_smallest_pvalue() {
        let chunk = chunk_with_one_shifted_gene();
        let partial = NbinomWorker.test_chunk(&chunk, &context(4, 4)).unwrap();
        let best = partial
            .pvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(best, Some(0));
        assert!(partial.raw_fold_changes[0] > 2.0);
    }

    #[test]
    fn test_means_match_normalized_counts() {
        let chunk = chunk_with_one_shifted_gene();
        let partial = NbinomWorker.test_chunk(&chunk, &context(4, 4)).unwrap();
        for i in 0..partial.len() {
            let avg = (partial.means_a[i] + partial.means_b[i]) / 2.0;
            assert!((partial.base_means[i] - avg).abs() < 1e-9);
        }
    }

    #[test]
    fn test_flat_chunk_fails_with_chunk_index() {
        // constant within each group: no positive raw dispersion anywhere
        let counts = Array2::from_shape_fn((5, 4), |(g, c)| {
            if c < 2 {
                3.0 + g as f64
            } else {
                6.0 + 2.0 * g as f64
            }
        });
        let ids = (0..5).map(|g| format!("g{}", g)).collect();
        let chunk = Chunk::new(7, ids, counts).unwrap();
        let err = NbinomWorker.test_chunk(&chunk, &context(2, 2)).unwrap_err();
        assert_eq!(err.chunk(), Some(7));
        assert!(matches!(err.root(), FitError::DispersionFitFailed { .. }));
    }
}
