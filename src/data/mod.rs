//! Data structures for differential expression input

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::{ExpressionDataset, DEFAULT_DERIVED_COLUMNS};
pub use metadata::{CellMetadata, GeneMetadata};
