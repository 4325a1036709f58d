//! Per-chunk normalization of count data

mod size_factors;

pub use size_factors::{estimate_size_factors, normalize_counts, SizeFactorMethod};
