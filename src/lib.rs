//! rust_diffexp: chunked parallel differential expression for single-cell data
//!
//! A gene-by-cell count matrix is split into chunks of genes, each chunk is
//! tested between two groups of cells with an exact negative binomial test on
//! the rayon pool, and the partial results are merged into one ranked table
//! with fold changes and Benjamini-Hochberg adjusted p-values.
//!
//! # Example
//!
//! ```ignore
//! use rust_diffexp::prelude::*;
//!
//! let counts = read_count_matrix("counts.tsv")?;
//! let cells = read_cell_metadata("cells.csv")?;
//! let dataset = ExpressionDataset::new(counts, cells)?;
//!
//! let args = DiffExpArgs::new("cluster", "3", "rest");
//! let result = run_diff_expression(&dataset, &args)?;
//! println!("{}", result.summary(0.05));
//! ```

pub mod aggregate;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod dispersion;
pub mod error;
pub mod io;
pub mod normalization;
pub mod partition;
pub mod testing;
pub mod validation;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::aggregate_results;
    pub use crate::conditions::{resolve_conditions, ConditionAssignment, ConditionB, Group};
    pub use crate::config::DiffExpConfig;
    pub use crate::data::{CellMetadata, CountMatrix, ExpressionDataset, GeneMetadata};
    pub use crate::dispatch::dispatch_chunks;
    pub use crate::dispersion::{DispersionMethod, DispersionParams, SharingMode, TrendFitMethod};
    pub use crate::error::{DiffExpError, ErrorKind, Result};
    pub use crate::io::{
        read_cell_metadata, read_count_matrix, read_gene_ranking, write_results, write_results_json,
        DeResult, ResultsSummary,
    };
    pub use crate::normalization::SizeFactorMethod;
    pub use crate::partition::{partition_matrix, Chunk, PartitionPolicy};
    pub use crate::validation::{validate_request, DiffExpArgs, DiffExpRequest};
    pub use crate::worker::{ChunkTester, NbinomWorker, PartialResult, TestContext};
    pub use crate::{run_diff_expression, run_diff_expression_with};
}

use log::info;

use prelude::*;
use validation::validate_request_with;

/// Run the differential expression pipeline with default parameters
pub fn run_diff_expression(dataset: &ExpressionDataset, args: &DiffExpArgs) -> Result<DeResult> {
    run_diff_expression_with(dataset, args, &DiffExpConfig::default())
}

/// Run the differential expression pipeline with explicit parameters
pub fn run_diff_expression_with(
    dataset: &ExpressionDataset,
    args: &DiffExpArgs,
    config: &DiffExpConfig,
) -> Result<DeResult> {
    run_with_tester(dataset, args, config, &NbinomWorker)
}

/// Run the pipeline with a custom per-chunk test
///
/// Validation, condition resolution and partitioning all complete before
/// `tester` sees any chunk.
pub fn run_with_tester<W: ChunkTester>(
    dataset: &ExpressionDataset,
    args: &DiffExpArgs,
    config: &DiffExpConfig,
    tester: &W,
) -> Result<DeResult> {
    let request = validate_request_with(dataset, args, &config.dispersion)?;

    let assignment = resolve_conditions(
        dataset.cell_metadata(),
        &request.column,
        &request.label_a,
        &request.condition_b,
    )?;

    let chunks = partition_matrix(dataset, &assignment, request.gene_limit, &config.partition)?;

    let dispersion = DispersionParams {
        fit_type: request.fit_type,
        method: request.method,
        ..config.dispersion.clone()
    };
    info!(
        "Testing {} vs {} on '{}' (fit type {}, method {})",
        request.label_a, request.condition_b, request.column, dispersion.fit_type, dispersion.method
    );
    let ctx = TestContext::new(&assignment, dispersion, config.size_factor_method);

    let partials = dispatch_chunks(&chunks, tester, &ctx, config.threads)?;
    aggregate_results(partials, config.partition.pseudocount)
}
