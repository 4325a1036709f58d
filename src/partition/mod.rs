//! Gene-wise partitioning of the expression matrix into work units

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::conditions::ConditionAssignment;
use crate::data::ExpressionDataset;
use crate::error::{DiffExpError, InputError, Result};

/// Chunk sizing and count-offset policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionPolicy {
    /// Added to every count before rounding; subtracted again by the aggregator
    pub pseudocount: f64,
    /// Gene counts strictly above this use `large_chunk_rows`
    pub large_threshold: usize,
    /// Gene counts strictly below this use `small_chunk_rows`
    pub small_threshold: usize,
    pub large_chunk_rows: usize,
    pub medium_chunk_rows: usize,
    pub small_chunk_rows: usize,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            pseudocount: 1.0,
            large_threshold: 1000,
            small_threshold: 100,
            large_chunk_rows: 1000,
            medium_chunk_rows: 100,
            small_chunk_rows: 10,
        }
    }
}

impl PartitionPolicy {
    /// Rows per chunk for a filtered gene count
    pub fn chunk_rows(&self, n_genes: usize) -> usize {
        let rows = if n_genes > self.large_threshold {
            self.large_chunk_rows
        } else if n_genes < self.small_threshold {
            self.small_chunk_rows
        } else {
            self.medium_chunk_rows
        };
        rows.max(1)
    }

    /// Number of chunks produced for a filtered gene count
    pub fn chunk_count(&self, n_genes: usize) -> usize {
        n_genes.div_ceil(self.chunk_rows(n_genes))
    }
}

/// A contiguous block of filtered genes over every participating cell
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of the chunk in the partition
    index: usize,
    gene_ids: Vec<String>,
    /// Offset, rounded counts (genes x participating cells, assignment order)
    counts: Array2<f64>,
}

impl Chunk {
    pub fn new(index: usize, gene_ids: Vec<String>, counts: Array2<f64>) -> Result<Self> {
        if gene_ids.len() != counts.nrows() {
            return Err(DiffExpError::DimensionMismatch {
                expected: format!("{} gene IDs", counts.nrows()),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        Ok(Self {
            index,
            gene_ids,
            counts,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn n_cells(&self) -> usize {
        self.counts.ncols()
    }
}

/// Mean > 0 and standard deviation > 0 across the given cells
fn is_testable(row: ArrayView1<'_, f64>) -> bool {
    let n = row.len();
    if n == 0 {
        return false;
    }
    let mean = row.sum() / n as f64;
    if mean <= 0.0 {
        return false;
    }
    let ss: f64 = row.iter().map(|&x| (x - mean) * (x - mean)).sum();
    ss > 0.0
}

/// Row indices of the genes entering the test, before the variance filter
fn candidate_genes(dataset: &ExpressionDataset, gene_limit: Option<usize>) -> Result<Vec<usize>> {
    match gene_limit {
        None => Ok((0..dataset.n_genes()).collect()),
        Some(limit) => {
            let genes = dataset.gene_metadata();
            if !genes.has_ranking() {
                return Err(InputError::InvalidArgument {
                    name: "gene_limit".to_string(),
                    reason: "the dataset has no gene ranking to take the top genes from".to_string(),
                }
                .into());
            }
            let mut ranked = genes.ranked_indices()?;
            ranked.truncate(limit);
            Ok(ranked)
        }
    }
}

/// Select, filter, offset and split the matrix into chunks
pub fn partition_matrix(
    dataset: &ExpressionDataset,
    assignment: &ConditionAssignment,
    gene_limit: Option<usize>,
    policy: &PartitionPolicy,
) -> Result<Vec<Chunk>> {
    let restricted = dataset.counts().restrict_cells(assignment.cells())?;
    let counts = restricted.counts();

    let candidates = candidate_genes(dataset, gene_limit)?;
    let kept: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| is_testable(counts.row(i)))
        .collect();

    log::info!(
        "{} of {} candidate genes have non-zero mean and variance across {} cells",
        kept.len(),
        candidates.len(),
        assignment.len()
    );

    if kept.is_empty() {
        return Err(InputError::NoTestableGenes {
            reason: format!(
                "none of {} candidate genes vary across the selected cells",
                candidates.len()
            ),
        }
        .into());
    }

    let offset = policy.pseudocount;
    let filtered = counts
        .select(Axis(0), &kept)
        .mapv(|x| (x + offset).round());
    let gene_ids: Vec<String> = kept
        .iter()
        .map(|&i| restricted.gene_ids()[i].clone())
        .collect();

    let rows = policy.chunk_rows(kept.len());
    let chunks = split_rows(&filtered, &gene_ids, rows)?;
    log::info!(
        "Partitioned {} genes into {} chunks of up to {} rows",
        kept.len(),
        chunks.len(),
        rows
    );
    Ok(chunks)
}

/// Cut contiguous row blocks of `rows` genes (the last block may be shorter)
fn split_rows(counts: &Array2<f64>, gene_ids: &[String], rows: usize) -> Result<Vec<Chunk>> {
    let n = gene_ids.len();
    (0..n)
        .step_by(rows)
        .enumerate()
        .map(|(index, start)| {
            let end = (start + rows).min(n);
            let block = counts.slice(ndarray::s![start..end, ..]).to_owned();
            Chunk::new(index, gene_ids[start..end].to_vec(), block)
        })
        .collect()
}
