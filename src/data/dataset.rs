//! ExpressionDataset - read-only input of a differential expression run

use std::collections::BTreeMap;

use super::{CellMetadata, CountMatrix, GeneMetadata};
use crate::error::{InputError, Result};

/// Derived cell metadata columns produced by upstream pipeline steps
/// (column name, producing step)
pub const DEFAULT_DERIVED_COLUMNS: &[(&str, &str)] = &[("cluster", "clustering")];

/// Count matrix plus gene and cell metadata, as handed over by the upstream
/// filtering/normalization/clustering stages
#[derive(Debug, Clone)]
pub struct ExpressionDataset {
    /// Counts (genes x cells)
    counts: CountMatrix,
    /// Gene identifiers and importance ranking
    gene_metadata: GeneMetadata,
    /// Per-cell categorical annotations
    cell_metadata: CellMetadata,
    /// Columns that only exist once an upstream step has run (column -> step)
    derived_columns: BTreeMap<String, String>,
}

impl ExpressionDataset {
    /// Create a dataset and check its structural invariants
    pub fn new(counts: CountMatrix, cell_metadata: CellMetadata) -> Result<Self> {
        let gene_metadata = GeneMetadata::new(counts.gene_ids().to_vec());
        let dataset = Self::from_parts(counts, gene_metadata, cell_metadata);
        dataset.validate()?;
        Ok(dataset)
    }

    /// Assemble a dataset without validation
    ///
    /// [`ExpressionDataset::validate`] is run by the validation gate before any
    /// differential expression work.
    pub fn from_parts(
        counts: CountMatrix,
        gene_metadata: GeneMetadata,
        cell_metadata: CellMetadata,
    ) -> Self {
        let derived_columns = DEFAULT_DERIVED_COLUMNS
            .iter()
            .map(|(c, p)| (c.to_string(), p.to_string()))
            .collect();
        Self {
            counts,
            gene_metadata,
            cell_metadata,
            derived_columns,
        }
    }

    /// Attach the externally computed gene importance ranking
    pub fn with_ranking(mut self, ranking: Vec<String>) -> Result<Self> {
        self.gene_metadata = self.gene_metadata.with_ranking(ranking);
        self.gene_metadata.ranked_indices()?;
        Ok(self)
    }

    /// Declare a column that is produced by an upstream step
    pub fn with_derived_column(mut self, column: &str, producer: &str) -> Self {
        self.derived_columns
            .insert(column.to_string(), producer.to_string());
        self
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn gene_metadata(&self) -> &GeneMetadata {
        &self.gene_metadata
    }

    pub fn cell_metadata(&self) -> &CellMetadata {
        &self.cell_metadata
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_cells(&self) -> usize {
        self.counts.n_cells()
    }

    /// If `column` is a derived column that has not been computed yet,
    /// return the name of the step that produces it
    pub fn pending_prerequisite(&self, column: &str) -> Option<&str> {
        if self.cell_metadata.has_column(column) {
            return None;
        }
        self.derived_columns.get(column).map(|s| s.as_str())
    }

    /// Check the structural invariants between matrix and metadata
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        let unrecognized = |reason: String| InputError::UnrecognizedDataset { reason };

        if self.gene_metadata.n_genes() != self.counts.n_genes() {
            return Err(unrecognized(format!(
                "gene metadata has {} rows but the matrix has {} genes",
                self.gene_metadata.n_genes(),
                self.counts.n_genes()
            )));
        }
        if self.gene_metadata.gene_ids() != self.counts.gene_ids() {
            return Err(unrecognized(
                "gene metadata identifiers do not match matrix rows".to_string(),
            ));
        }
        if self.cell_metadata.n_cells() != self.counts.n_cells() {
            return Err(unrecognized(format!(
                "cell metadata has {} rows but the matrix has {} cells",
                self.cell_metadata.n_cells(),
                self.counts.n_cells()
            )));
        }
        if let Some(dup) = self.cell_metadata.first_duplicate_id() {
            return Err(unrecognized(format!("duplicate cell identifier '{}'", dup)));
        }
        if self.cell_metadata.cell_ids() != self.counts.cell_ids() {
            return Err(unrecognized(
                "cell metadata identifiers do not match matrix columns".to_string(),
            ));
        }
        self.gene_metadata
            .ranked_indices()
            .map_err(|e| unrecognized(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        CountMatrix::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            vec!["g1".to_string(), "g2".to_string()],
            vec!["c1".to_string(), "c2".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_valid_dataset() {
        let cells = CellMetadata::new(vec!["c1".to_string(), "c2".to_string()]);
        let ds = ExpressionDataset::new(matrix(), cells).unwrap();
        assert_eq!(ds.n_genes(), 2);
        assert_eq!(ds.n_cells(), 2);
        assert_eq!(ds.pending_prerequisite("cluster"), Some("clustering"));
        assert_eq!(ds.pending_prerequisite("batch"), None);

        let ds = ds.with_derived_column("trajectory", "pseudotime");
        assert_eq!(ds.pending_prerequisite("trajectory"), Some("pseudotime"));
    }

    #[test]
    fn test_computed_derived_column() {
        let mut cells = CellMetadata::new(vec!["c1".to_string(), "c2".to_string()]);
        cells
            .add_column("cluster", vec!["1".to_string(), "2".to_string()])
            .unwrap();
        let ds = ExpressionDataset::new(matrix(), cells).unwrap();
        assert_eq!(ds.pending_prerequisite("cluster"), None);
    }

    #[test]
    fn test_mismatched_cells_rejected() {
        let cells = CellMetadata::new(vec!["c2".to_string(), "c1".to_string()]);
        assert!(ExpressionDataset::new(matrix(), cells).is_err());

        let cells = CellMetadata::new(vec!["c1".to_string()]);
        let ds = ExpressionDataset::from_parts(
            matrix(),
            GeneMetadata::new(vec!["g1".to_string(), "g2".to_string()]),
            cells,
        );
        assert!(matches!(ds.validate(), Err(InputError::UnrecognizedDataset { .. })));
    }

    #[test]
    fn test_ranking_must_reference_known_genes() {
        let cells = CellMetadata::new(vec!["c1".to_string(), "c2".to_string()]);
        let ds = ExpressionDataset::new(matrix(), cells).unwrap();
        assert!(ds.clone().with_ranking(vec!["g2".to_string()]).is_ok());
        assert!(ds.clone().with_ranking(vec!["nope".to_string()]).is_err());
        assert!(ds
            .with_ranking(vec!["g1".to_string(), "g2".to_string(), "g1".to_string()])
            .is_err());
    }

    #[test]
    fn test_repeated_ranking_fails_validation() {
        let cells = CellMetadata::new(vec!["c1".to_string(), "c2".to_string()]);
        let genes = GeneMetadata::new(vec!["g1".to_string(), "g2".to_string()])
            .with_ranking(vec!["g2".to_string(), "g2".to_string()]);
        let ds = ExpressionDataset::from_parts(matrix(), genes, cells);
        assert!(matches!(ds.validate(), Err(InputError::UnrecognizedDataset { .. })));
    }
}
