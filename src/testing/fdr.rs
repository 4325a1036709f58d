//! Multiple testing correction

use std::cmp::Ordering;

/// Benjamini-Hochberg adjusted p-values
///
/// NaN p-values are not counted as tests and stay NaN. The output is in the
/// same order as the input.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let m = pvalues.iter().filter(|p| !p.is_nan()).count();
    if m == 0 {
        return vec![f64::NAN; n];
    }

    let mut order: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    order.sort_by(|&a, &b| pvalues[a].partial_cmp(&pvalues[b]).unwrap_or(Ordering::Equal));

    let mut padj = vec![f64::NAN; n];
    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in &padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }

        let padj = benjamini_hochberg(&[0.001, 0.01, 0.05, 0.5]);
        let expected = [0.004, 0.02, 0.0666666666666, 0.5];
        for (a, e) in padj.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-9, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!((padj[2] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bh_monotone_and_bounded() {
        let pvalues = [0.9, 0.001, 0.2, 0.04, 0.7];
        let padj = benjamini_hochberg(&pvalues);
        for (p, adj) in pvalues.iter().zip(padj.iter()) {
            assert!(*adj >= *p && *adj <= 1.0);
        }
        assert!(padj[1] <= padj[3] && padj[3] <= padj[2]);
    }

    #[test]
    fn test_bh_all_nan() {
        assert!(benjamini_hochberg(&[f64::NAN, f64::NAN]).iter().all(|p| p.is_nan()));
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
