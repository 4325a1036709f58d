//! Reading inputs and exporting results

mod csv;
mod results;

pub use self::csv::{read_cell_metadata, read_count_matrix, read_gene_ranking, write_results, write_results_json};
pub use results::{DeResult, DeRow, ResultsSummary};
