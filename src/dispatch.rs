//! Parallel fan-out of chunks over the rayon pool

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{FitError, Result};
use crate::partition::Chunk;
use crate::worker::{ChunkTester, PartialResult, TestContext};

/// Run `worker` on every chunk and collect the results in chunk order
///
/// With `threads` set, a dedicated pool of that size is built for the call;
/// otherwise the global pool is used. The first failing chunk aborts the run.
pub fn dispatch_chunks<W: ChunkTester>(
    chunks: &[Chunk],
    worker: &W,
    ctx: &TestContext,
    threads: Option<usize>,
) -> Result<Vec<PartialResult>> {
    info!("Dispatching {} chunks", chunks.len());

    let partials = match threads {
        Some(n) if n > 0 => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            debug!("Using a dedicated pool of {} threads", n);
            pool.install(|| run_all(chunks, worker, ctx))?
        }
        _ => run_all(chunks, worker, ctx)?,
    };

    Ok(partials)
}

fn run_all<W: ChunkTester>(
    chunks: &[Chunk],
    worker: &W,
    ctx: &TestContext,
) -> std::result::Result<Vec<PartialResult>, FitError> {
    chunks
        .par_iter()
        .map(|chunk| worker.test_chunk(chunk, ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::DispersionParams;
    use crate::error::{DiffExpError, ErrorKind};
    use crate::normalization::SizeFactorMethod;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| {
                let ids = vec![format!("g{}", i)];
                Chunk::new(i, ids, Array2::from_elem((1, 4), i as f64 + 1.0)).unwrap()
            })
            .collect()
    }

    fn context() -> TestContext {
        TestContext {
            a_cols: vec![0, 1],
            b_cols: vec![2, 3],
            dispersion: DispersionParams::default(),
            size_factor_method: SizeFactorMethod::Ratio,
        }
    }

    fn stub_partial(chunk: &Chunk) -> PartialResult {
        PartialResult {
            chunk: chunk.index(),
            gene_ids: chunk.gene_ids().to_vec(),
            base_means: vec![1.0; chunk.n_genes()],
            means_a: vec![1.0; chunk.n_genes()],
            means_b: vec![1.0; chunk.n_genes()],
            pvalues: vec![0.5; chunk.n_genes()],
            raw_fold_changes: vec![1.0; chunk.n_genes()],
        }
    }

    /// Early chunks finish last
    struct SlowFirst;

    impl ChunkTester for SlowFirst {
        fn test_chunk(&self, chunk: &Chunk, _ctx: &TestContext) -> std::result::Result<PartialResult, FitError> {
            thread::sleep(Duration::from_millis(20u64.saturating_sub(2 * chunk.index() as u64)));
            Ok(stub_partial(chunk))
        }
    }

    /// Fails on one chunk; every other chunk takes a few milliseconds
    struct FailOn {
        chunk: usize,
        calls: AtomicUsize,
    }

    impl FailOn {
        fn new(chunk: usize) -> Self {
            Self {
                chunk,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ChunkTester for FailOn {
        fn test_chunk(&self, chunk: &Chunk, _ctx: &TestContext) -> std::result::Result<PartialResult, FitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if chunk.index() == self.chunk {
                return Err(FitError::DispersionFitFailed {
                    reason: "zero variance".to_string(),
                }
                .in_chunk(chunk.index()));
            }
            thread::sleep(Duration::from_millis(5));
            Ok(stub_partial(chunk))
        }
    }

    #[test]
    fn test_results_in_chunk_order() {
        let chunks = chunks(10);
        let partials = dispatch_chunks(&chunks, &SlowFirst, &context(), Some(4)).unwrap();
        let order: Vec<usize> = partials.iter().map(|p| p.chunk).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_global_pool() {
        let chunks = chunks(3);
        let partials = dispatch_chunks(&chunks, &SlowFirst, &context(), None).unwrap();
        assert_eq!(partials.len(), 3);
    }

    #[test]
    fn test_first_failure_aborts() {
        let chunks = chunks(8);
        let worker = FailOn::new(5);
        let err = dispatch_chunks(&chunks, &worker, &context(), Some(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fit);
        match err {
            DiffExpError::Fit(fit) => assert_eq!(fit.chunk(), Some(5)),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_outstanding_chunks_skipped_after_failure() {
        let chunks = chunks(64);
        let worker = FailOn::new(0);
        let err = dispatch_chunks(&chunks, &worker, &context(), Some(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fit);
        let calls = worker.calls.load(Ordering::SeqCst);
        assert!(calls < chunks.len(), "all {} chunks ran", calls);
    }

    #[test]
    fn test_no_chunks() {
        let partials = dispatch_chunks(&[], &SlowFirst, &context(), None).unwrap();
        assert!(partials.is_empty());
    }
}
