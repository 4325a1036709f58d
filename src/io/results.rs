//! Differential expression result table

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ranked differential expression results, one entry per tested gene
///
/// Columns are parallel vectors sorted ascending by raw p-value, NaN last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeResult {
    pub gene_ids: Vec<String>,
    /// Mean normalized count over both groups
    pub base_means: Vec<f64>,
    pub means_a: Vec<f64>,
    pub means_b: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted over the whole table
    pub padj: Vec<f64>,
    /// meanB / meanA as reported by the test
    pub raw_fold_changes: Vec<f64>,
    /// (meanB - pseudocount) / (meanA - pseudocount)
    ///
    /// The group means are taken over normalized offset counts, so subtracting
    /// the pseudocount gives the normalized pre-offset mean only when the
    /// group's mean inverse size factor is 1. This is the DESeq notion of a
    /// base mean, not the raw count mean.
    pub fold_changes: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
}

/// One row of a [`DeResult`], named as in the exported table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeRow {
    pub gene_id: String,
    #[serde(rename = "baseMean")]
    pub base_mean: f64,
    #[serde(rename = "meanA")]
    pub mean_a: f64,
    #[serde(rename = "meanB")]
    pub mean_b: f64,
    pub pvalue: f64,
    pub padj: f64,
    #[serde(rename = "rawFoldChange")]
    pub raw_fold_change: f64,
    #[serde(rename = "foldChange")]
    pub fold_change: f64,
    #[serde(rename = "log2FoldChange")]
    pub log2_fold_change: f64,
}

impl DeResult {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gene_ids.is_empty()
    }

    pub fn row(&self, i: usize) -> Option<DeRow> {
        Some(DeRow {
            gene_id: self.gene_ids.get(i)?.clone(),
            base_mean: *self.base_means.get(i)?,
            mean_a: *self.means_a.get(i)?,
            mean_b: *self.means_b.get(i)?,
            pvalue: *self.pvalues.get(i)?,
            padj: *self.padj.get(i)?,
            raw_fold_change: *self.raw_fold_changes.get(i)?,
            fold_change: *self.fold_changes.get(i)?,
            log2_fold_change: *self.log2_fold_changes.get(i)?,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = DeRow> + '_ {
        (0..self.n_genes()).filter_map(move |i| self.row(i))
    }

    /// Position of a gene in the ranked table
    pub fn position(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Genes with padj below `alpha`
    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(self.padj.iter())
            .filter(|(_, &p)| p < alpha)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    fn count_significant(&self, alpha: f64, up: bool) -> usize {
        self.padj
            .iter()
            .zip(self.log2_fold_changes.iter())
            .filter(|(&p, &lfc)| p < alpha && if up { lfc > 0.0 } else { lfc < 0.0 })
            .count()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| !p.is_nan()).count(),
            significant: self.significant_genes(alpha).len(),
            upregulated: self.count_significant(alpha, true),
            downregulated: self.count_significant(alpha, false),
            nan_pvalues: self.pvalues.iter().filter(|p| p.is_nan()).count(),
            alpha,
        }
    }
}

/// Counts of tested and significant genes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    /// Significant and higher in group B
    pub upregulated: usize,
    pub downregulated: usize,
    pub nan_pvalues: usize,
    pub alpha: f64,
}

impl fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Differential expression summary")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up in B: {}", self.upregulated)?;
        writeln!(f, "  Down in B: {}", self.downregulated)?;
        if self.nan_pvalues > 0 {
            writeln!(f, "NaN p-values: {}", self.nan_pvalues)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_result() -> DeResult {
        DeResult {
            gene_ids: vec!["up".into(), "down".into(), "flat".into(), "none".into()],
            base_means: vec![10.0, 8.0, 5.0, 1.0],
            means_a: vec![5.0, 12.0, 5.0, 1.0],
            means_b: vec![15.0, 4.0, 5.0, 1.0],
            pvalues: vec![0.001, 0.004, 0.8, f64::NAN],
            padj: vec![0.003, 0.006, 0.8, f64::NAN],
            raw_fold_changes: vec![3.0, 0.33, 1.0, 1.0],
            fold_changes: vec![3.5, 0.27, 1.0, f64::NAN],
            log2_fold_changes: vec![1.807, -1.889, 0.0, f64::NAN],
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = small_result().summary(0.05);
        assert_eq!(summary.total_genes, 4);
        assert_eq!(summary.genes_tested, 3);
        assert_eq!(summary.significant, 2);
        assert_eq!(summary.upregulated, 1);
        assert_eq!(summary.downregulated, 1);
        assert_eq!(summary.nan_pvalues, 1);

        let text = summary.to_string();
        assert!(text.contains("Significant (padj < 0.05): 2"));
        assert!(text.contains("NaN p-values: 1"));
    }

    #[test]
    fn test_rows() {
        let result = small_result();
        let rows: Vec<DeRow> = result.rows().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].gene_id, "down");
        assert_eq!(rows[1].mean_a, 12.0);
        assert!(result.row(4).is_none());
        assert_eq!(result.position("flat"), Some(2));
    }
}
