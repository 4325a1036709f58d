//! Error types for rust_diffexp

use thiserror::Error;

/// Coarse classification of a [`DiffExpError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-correctable input problem, raised before any chunk is dispatched
    Input,
    /// Statistical fit failure inside a chunk
    Fit,
    /// Malformed or empty partial results
    Aggregation,
    /// File or format error in the I/O layer
    Io,
}

/// Problems with the dataset or the caller's arguments
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Unrecognized dataset: {reason}")]
    UnrecognizedDataset { reason: String },

    #[error("Missing required argument: {name}")]
    MissingArgument { name: String },

    #[error("Column '{column}' not found in cell metadata")]
    ColumnNotFound { column: String },

    #[error("Column '{column}' has not been computed yet; run {producer} first")]
    PrerequisiteMissing { column: String, producer: String },

    #[error("Label '{label}' not found in column '{column}'")]
    LabelNotFound { column: String, label: String },

    #[error("Gene limit must be a positive integer, got '{value}'")]
    NonNumericGeneLimit { value: String },

    #[error("Condition group {group} is empty")]
    EmptyGroup { group: String },

    #[error("No genes left to test: {reason}")]
    NoTestableGenes { reason: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}

/// Statistical failures raised by a chunk worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Dispersion fit failed: {reason}")]
    DispersionFitFailed { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Chunk {chunk}: {source}")]
    InChunk {
        chunk: usize,
        #[source]
        source: Box<FitError>,
    },
}

impl FitError {
    /// Attach the index of the chunk the failure happened in
    pub fn in_chunk(self, chunk: usize) -> Self {
        FitError::InChunk {
            chunk,
            source: Box::new(self),
        }
    }

    /// The underlying failure, without chunk context
    pub fn root(&self) -> &FitError {
        match self {
            FitError::InChunk { source, .. } => source.root(),
            other => other,
        }
    }

    /// Index of the failing chunk, if known
    pub fn chunk(&self) -> Option<usize> {
        match self {
            FitError::InChunk { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }
}

/// Failures while merging partial results
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("No partial results to aggregate")]
    NoPartials,

    #[error("All {chunks} partial results are empty")]
    EmptyPartials { chunks: usize },

    #[error("Partial result for chunk {chunk} is malformed: {reason}")]
    MalformedPartial { chunk: usize, reason: String },
}

/// Main error type for differential expression runs
#[derive(Error, Debug)]
pub enum DiffExpError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DiffExpError {
    /// Classify the error into one of the pipeline's error families
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiffExpError::Input(_)
            | DiffExpError::InvalidCountMatrix { .. }
            | DiffExpError::InvalidMetadata { .. }
            | DiffExpError::DimensionMismatch { .. } => ErrorKind::Input,
            DiffExpError::Fit(_) => ErrorKind::Fit,
            DiffExpError::Aggregation(_) => ErrorKind::Aggregation,
            DiffExpError::ThreadPool(_)
            | DiffExpError::IoError(_)
            | DiffExpError::CsvError(_)
            | DiffExpError::JsonError(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for differential expression operations
pub type Result<T> = std::result::Result<T, DiffExpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: DiffExpError = InputError::EmptyGroup { group: "A".to_string() }.into();
        assert_eq!(err.kind(), ErrorKind::Input);

        let fit = FitError::DispersionFitFailed {
            reason: "no variance".to_string(),
        }
        .in_chunk(3);
        assert_eq!(fit.chunk(), Some(3));
        assert!(matches!(fit.root(), FitError::DispersionFitFailed { .. }));

        let err: DiffExpError = fit.into();
        assert_eq!(err.kind(), ErrorKind::Fit);
        assert_eq!(err.to_string(), "Chunk 3: Dispersion fit failed: no variance");

        let err: DiffExpError = AggregationError::NoPartials.into();
        assert_eq!(err.kind(), ErrorKind::Aggregation);
    }
}
