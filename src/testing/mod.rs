//! Statistical testing for differential expression

mod exact;
mod fdr;

pub use exact::{log_dnbinom, nbinom_exact_test, GroupTotals};
pub use fdr::benjamini_hochberg;
