//! Size factor estimation using the median of ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeFactorMethod {
    /// Standard median of ratios over genes with no zero count
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

impl Default for SizeFactorMethod {
    fn default() -> Self {
        SizeFactorMethod::Ratio
    }
}

/// Estimate one size factor per cell (column) of `counts`
pub fn estimate_size_factors(
    counts: ArrayView2<'_, f64>,
    method: SizeFactorMethod,
) -> Result<Array1<f64>, FitError> {
    let (n_genes, n_cells) = counts.dim();
    if n_genes == 0 || n_cells == 0 {
        return Err(FitError::SizeFactorFailed {
            reason: "count matrix is empty".to_string(),
        });
    }

    // log geometric mean per gene; None for genes excluded from the reference
    let log_geo_means: Vec<Option<f64>> = counts
        .axis_iter(Axis(0))
        .map(|row| match method {
            SizeFactorMethod::Ratio => {
                if row.iter().all(|&x| x > 0.0) {
                    Some(row.iter().map(|&x| x.ln()).sum::<f64>() / n_cells as f64)
                } else {
                    None
                }
            }
            SizeFactorMethod::PosCounts => {
                // divide by the total number of cells, not the positive ones
                let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
                if row.iter().any(|&x| x > 0.0) {
                    Some(log_sum / n_cells as f64)
                } else {
                    None
                }
            }
        })
        .collect();

    if log_geo_means.iter().all(|g| g.is_none()) {
        return Err(FitError::SizeFactorFailed {
            reason: match method {
                SizeFactorMethod::Ratio => "no genes with all non-zero counts".to_string(),
                SizeFactorMethod::PosCounts => "no genes with positive counts".to_string(),
            },
        });
    }

    let mut size_factors = Array1::zeros(n_cells);
    for j in 0..n_cells {
        let mut log_ratios: Vec<f64> = log_geo_means
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                let geo = (*g)?;
                let count = counts[[i, j]];
                (count > 0.0).then(|| count.ln() - geo)
            })
            .collect();

        size_factors[j] = match median(&mut log_ratios) {
            Some(m) => m.exp(),
            None if method == SizeFactorMethod::PosCounts => 1.0,
            None => {
                return Err(FitError::SizeFactorFailed {
                    reason: format!("no valid ratios for cell {}", j),
                })
            }
        };
    }

    if method == SizeFactorMethod::PosCounts {
        // centre so the geometric mean of the size factors is 1
        let log_mean = size_factors.iter().map(|&x: &f64| x.ln()).sum::<f64>() / n_cells as f64;
        let centre = log_mean.exp();
        size_factors.mapv_inplace(|x| x / centre);
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(FitError::SizeFactorFailed {
            reason: "invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}

/// Divide each column of `counts` by its size factor
pub fn normalize_counts(counts: ArrayView2<'_, f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut col, &sf) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|x| x / sf);
    }
    normalized
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    Some(if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn depth_counts() -> Array2<f64> {
        array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0]
        ]
    }

    #[test]
    fn test_size_factor_estimation() {
        let counts = depth_counts();
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // cell 2 has twice the depth of cell 1
        let ratio = sf[1] / sf[0];
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_counts() {
        let counts = depth_counts();
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        let norm = normalize_counts(counts.view(), &sf);

        let row: Vec<f64> = norm.row(0).to_vec();
        let mean = row.iter().sum::<f64>() / 4.0;
        for val in row {
            assert!((val - mean).abs() / mean < 0.1);
        }
    }

    #[test]
    fn test_ratio_requires_positive_gene() {
        let counts = array![[0.0, 3.0], [2.0, 0.0]];
        let err = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap_err();
        assert!(matches!(err, FitError::SizeFactorFailed { .. }));

        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::PosCounts).unwrap();
        assert!(sf.iter().all(|x| x.is_finite() && *x > 0.0));
    }
}
