//! Metadata structures for cells and genes

use std::collections::{HashMap, HashSet};

use crate::error::{DiffExpError, InputError, Result};

/// Cell metadata: one entry per cell, arbitrary categorical columns
#[derive(Debug, Clone)]
pub struct CellMetadata {
    /// Cell identifiers
    cell_ids: Vec<String>,
    /// Categorical columns (column name -> value for each cell)
    columns: HashMap<String, Vec<String>>,
}

impl CellMetadata {
    /// Create new cell metadata
    pub fn new(cell_ids: Vec<String>) -> Self {
        Self {
            cell_ids,
            columns: HashMap::new(),
        }
    }

    /// Add a categorical column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.cell_ids.len() {
            return Err(DiffExpError::DimensionMismatch {
                expected: format!("{} values", self.cell_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        self.columns.insert(name.to_string(), values);
        Ok(())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> std::result::Result<&[String], InputError> {
        self.columns
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| InputError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    /// Whether `label` occurs at least once in column `name`
    pub fn contains_label(&self, name: &str, label: &str) -> std::result::Result<bool, InputError> {
        Ok(self.column(name)?.iter().any(|v| v == label))
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    /// All column names, sorted
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// First duplicated cell identifier, if any
    pub fn first_duplicate_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.cell_ids
            .iter()
            .find(|id| !seen.insert(id.as_str()))
            .map(|s| s.as_str())
    }
}

/// Gene metadata: identifiers plus an externally supplied importance ranking
#[derive(Debug, Clone)]
pub struct GeneMetadata {
    /// Gene identifiers, in matrix row order
    gene_ids: Vec<String>,
    /// Gene identifiers ordered from most to least important
    ranking: Vec<String>,
}

impl GeneMetadata {
    /// Create gene metadata without a ranking
    pub fn new(gene_ids: Vec<String>) -> Self {
        Self {
            gene_ids,
            ranking: Vec::new(),
        }
    }

    /// Attach an importance ranking (most important first)
    pub fn with_ranking(mut self, ranking: Vec<String>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn ranking(&self) -> &[String] {
        &self.ranking
    }

    pub fn has_ranking(&self) -> bool {
        !self.ranking.is_empty()
    }

    /// Row indices of the ranked genes, most important first
    ///
    /// A ranked gene missing from the matrix, or listed twice, is an error.
    pub fn ranked_indices(&self) -> Result<Vec<usize>> {
        let positions: HashMap<&str, usize> = self
            .gene_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut seen = HashSet::with_capacity(self.ranking.len());
        self.ranking
            .iter()
            .map(|id| {
                let index = positions.get(id.as_str()).copied().ok_or_else(|| {
                    DiffExpError::InvalidMetadata {
                        reason: format!("ranked gene '{}' is not in the count matrix", id),
                    }
                })?;
                if !seen.insert(index) {
                    return Err(DiffExpError::InvalidMetadata {
                        reason: format!("gene '{}' appears more than once in the ranking", id),
                    });
                }
                Ok(index)
            })
            .collect()
    }
}
