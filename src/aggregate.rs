//! Merge per-chunk partial results into the final ranked table

use std::cmp::Ordering;

use log::{info, warn};

use crate::error::{AggregationError, Result};
use crate::io::DeResult;
use crate::testing::benjamini_hochberg;
use crate::worker::PartialResult;

/// Ascending p-value, NaN after every number
fn pvalue_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

/// Concatenate partials in chunk order, stabilize fold changes, adjust
/// p-values across the whole table and rank by p-value
///
/// `pseudocount` is the offset added when the chunks were cut; it is removed
/// from both group means before the fold change is taken.
pub fn aggregate_results(mut partials: Vec<PartialResult>, pseudocount: f64) -> Result<DeResult> {
    if partials.is_empty() {
        return Err(AggregationError::NoPartials.into());
    }
    partials.sort_by_key(|p| p.chunk);

    if let Some(pair) = partials.windows(2).find(|w| w[0].chunk == w[1].chunk) {
        return Err(AggregationError::MalformedPartial {
            chunk: pair[1].chunk,
            reason: "chunk reported more than once".to_string(),
        }
        .into());
    }
    if let Some(p) = partials.iter().find(|p| !p.is_consistent()) {
        return Err(AggregationError::MalformedPartial {
            chunk: p.chunk,
            reason: format!("columns do not all have {} rows", p.len()),
        }
        .into());
    }

    let n: usize = partials.iter().map(PartialResult::len).sum();
    if n == 0 {
        return Err(AggregationError::EmptyPartials {
            chunks: partials.len(),
        }
        .into());
    }

    let mut gene_ids = Vec::with_capacity(n);
    let mut base_means = Vec::with_capacity(n);
    let mut means_a = Vec::with_capacity(n);
    let mut means_b = Vec::with_capacity(n);
    let mut pvalues = Vec::with_capacity(n);
    let mut raw_fold_changes = Vec::with_capacity(n);
    for p in partials {
        gene_ids.extend(p.gene_ids);
        base_means.extend(p.base_means);
        means_a.extend(p.means_a);
        means_b.extend(p.means_b);
        pvalues.extend(p.pvalues);
        raw_fold_changes.extend(p.raw_fold_changes);
    }

    let fold_changes: Vec<f64> = means_a
        .iter()
        .zip(means_b.iter())
        .map(|(&a, &b)| (b - pseudocount) / (a - pseudocount))
        .collect();
    let log2_fold_changes: Vec<f64> = fold_changes.iter().map(|fc| fc.log2()).collect();
    let padj = benjamini_hochberg(&pvalues);

    let nan_count = pvalues.iter().filter(|p| p.is_nan()).count();
    if nan_count > 0 {
        warn!("{} of {} genes have no p-value", nan_count, n);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| pvalue_order(pvalues[i], pvalues[j]));

    let pick_f = |v: &[f64]| order.iter().map(|&i| v[i]).collect::<Vec<f64>>();
    let result = DeResult {
        gene_ids: order.iter().map(|&i| gene_ids[i].clone()).collect(),
        base_means: pick_f(&base_means),
        means_a: pick_f(&means_a),
        means_b: pick_f(&means_b),
        pvalues: pick_f(&pvalues),
        padj: pick_f(&padj),
        raw_fold_changes: pick_f(&raw_fold_changes),
        fold_changes: pick_f(&fold_changes),
        log2_fold_changes: pick_f(&log2_fold_changes),
    };

    info!("Aggregated {} genes", result.n_genes());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiffExpError, ErrorKind};

    fn partial(chunk: usize, genes: &[(&str, f64, f64, f64)]) -> PartialResult {
        PartialResult {
            chunk,
            gene_ids: genes.iter().map(|g| g.0.to_string()).collect(),
            base_means: genes.iter().map(|g| (g.1 + g.2) / 2.0).collect(),
            means_a: genes.iter().map(|g| g.1).collect(),
            means_b: genes.iter().map(|g| g.2).collect(),
            pvalues: genes.iter().map(|g| g.3).collect(),
            raw_fold_changes: genes.iter().map(|g| g.2 / g.1).collect(),
        }
    }

    fn partials() -> Vec<PartialResult> {
        vec![
            partial(0, &[("a", 5.0, 10.0, 0.04), ("b", 3.0, 3.0, 0.9)]),
            partial(1, &[("c", 8.0, 2.0, 0.001), ("d", 4.0, 4.0, f64::NAN)]),
            partial(2, &[("e", 6.0, 12.0, 0.04)]),
        ]
    }

    #[test]
    fn test_fold_change_stabilization() {
        let result = aggregate_results(partials(), 1.0).unwrap();
        let i = result.position("a").unwrap();
        assert!((result.fold_changes[i] - 2.25).abs() < 1e-12);
        assert!((result.log2_fold_changes[i] - 1.169925).abs() < 1e-6);
        assert!((result.raw_fold_changes[i] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_at_pseudocount_is_not_finite() {
        let partials = vec![partial(0, &[("x", 1.0, 4.0, 0.3), ("y", 1.0, 1.0, 0.5)])];
        let result = aggregate_results(partials, 1.0).unwrap();
        assert!(result.fold_changes.iter().all(|fc| !fc.is_finite()));
        assert!(result.log2_fold_changes.iter().all(|fc| !fc.is_finite()));
    }

    #[test]
    fn test_sorted_by_pvalue_nan_last_stable() {
        let result = aggregate_results(partials(), 1.0).unwrap();
        assert_eq!(result.gene_ids, vec!["c", "a", "e", "b", "d"]);
        assert!(result.padj[4].is_nan());
        assert!((result.padj[0] - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_order_independent() {
        let forward = aggregate_results(partials(), 1.0).unwrap();
        let mut shuffled = partials();
        shuffled.reverse();
        shuffled.swap(0, 1);
        let backward = aggregate_results(shuffled, 1.0).unwrap();
        assert_eq!(forward.gene_ids, backward.gene_ids);
        assert_eq!(forward.pvalues.len(), backward.pvalues.len());
        for (x, y) in forward.padj.iter().zip(backward.padj.iter()) {
            assert!(x == y || (x.is_nan() && y.is_nan()));
        }
    }

    #[test]
    fn test_empty_inputs_fail() {
        let err = aggregate_results(vec![], 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregation);

        let err = aggregate_results(vec![partial(0, &[]), partial(1, &[])], 1.0).unwrap_err();
        assert!(matches!(
            err,
            DiffExpError::Aggregation(AggregationError::EmptyPartials { chunks: 2 })
        ));
    }

    #[test]
    fn test_malformed_partial() {
        let mut bad = partial(3, &[("a", 2.0, 3.0, 0.1)]);
        bad.pvalues.clear();
        let err = aggregate_results(vec![bad], 1.0).unwrap_err();
        assert!(matches!(
            err,
            DiffExpError::Aggregation(AggregationError::MalformedPartial { chunk: 3, .. })
        ));

        let dup = vec![partial(0, &[("a", 2.0, 3.0, 0.1)]), partial(0, &[("b", 2.0, 3.0, 0.1)])];
        assert!(aggregate_results(dup, 1.0).is_err());
    }
}
