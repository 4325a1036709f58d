//! Count matrix representation for single-cell expression data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{DiffExpError, Result};

/// Deduplicate names by appending _1, _2, etc. to duplicates
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in &names {
        *seen.entry(name.clone()).or_insert(0) += 1;
    }
    if !seen.values().any(|&c| c > 1) {
        return names;
    }
    seen.clear();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(name);
        } else {
            let new_name = format!("{}_{}", name, *count - 1);
            log::warn!("Duplicate gene name '{}' renamed to '{}'", name, new_name);
            result.push(new_name);
        }
    }
    result
}

/// A gene-by-cell count matrix
/// Rows are genes, columns are cells
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Count data (genes x cells)
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Cell identifiers
    cell_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, cell_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_cells) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DiffExpError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if cell_ids.len() != n_cells {
            return Err(DiffExpError::DimensionMismatch {
                expected: format!("{} cell IDs", n_cells),
                got: format!("{} cell IDs", cell_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DiffExpError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        let gene_ids = deduplicate_names(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            cell_ids,
        })
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of cells
    pub fn n_cells(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Restrict to the given cell columns, in the given order
    pub fn restrict_cells(&self, cell_indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = cell_indices.iter().find(|&&i| i >= self.n_cells()) {
            return Err(DiffExpError::DimensionMismatch {
                expected: format!("cell index < {}", self.n_cells()),
                got: format!("cell index {}", bad),
            });
        }
        let counts = self.counts.select(Axis(1), cell_indices);
        let cell_ids = cell_indices.iter().map(|&i| self.cell_ids[i].clone()).collect();
        Ok(Self {
            counts,
            gene_ids: self.gene_ids.clone(),
            cell_ids,
        })
    }
}
