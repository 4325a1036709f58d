//! Command-line interface for rust_diffexp

use clap::{Parser, Subcommand};

use crate::validation::DiffExpArgs;

#[derive(Parser)]
#[command(name = "rust_diffexp")]
#[command(version)]
#[command(about = "Chunked parallel differential expression between two groups of cells")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Test every gene for differential expression between two conditions
    #[command(
        long_about = "Test every gene for differential expression between two conditions\n\n\
            Genes are filtered, split into chunks and tested in parallel with an\n\
            exact negative binomial test. Results are merged, BH-adjusted and\n\
            ranked by p-value.",
        after_long_help = "\
Examples:
  # Cluster 3 against every other cell
  rust_diffexp run --counts counts.tsv --cell-metadata cells.csv \\
    --conditions cluster --condition-a 3 --condition-b rest

  # Two treatments against control, top 2000 ranked genes, 8 threads
  rust_diffexp run --counts counts.tsv --cell-metadata cells.csv \\
    --ranking ranking.txt --gene-limit 2000 --threads 8 \\
    --conditions treatment --condition-a control --condition-b drugA,drugB"
    )]
    Run {
        /// Count matrix, genes as rows and cells as columns
        #[arg(short, long,
            long_help = "Count matrix file.\n\
                First column = gene IDs, header = cell IDs.\n\
                Tab or comma delimited (auto-detected).")]
        counts: String,

        /// Per-cell metadata table
        #[arg(short = 'm', long,
            long_help = "Cell metadata file.\n\
                First column = cell IDs in the same order as the count matrix,\n\
                remaining columns = categorical annotations.")]
        cell_metadata: String,

        /// Gene ranking, one gene per line, most important first
        #[arg(short, long)]
        ranking: Option<String>,

        /// Metadata column holding the condition labels
        #[arg(long)]
        conditions: Option<String>,

        /// Label of condition A
        #[arg(long)]
        condition_a: Option<String>,

        /// Labels of condition B, comma separated, or "rest"
        #[arg(long)]
        condition_b: Option<String>,

        /// Dispersion trend fit: parametric, local or mean [default: local]
        #[arg(long)]
        fit_type: Option<String>,

        /// Dispersion method: per-condition, pooled or blind [default: per-condition]
        #[arg(long)]
        method: Option<String>,

        /// Only test the top N genes of the ranking
        #[arg(short = 'n', long, value_name = "N")]
        gene_limit: Option<String>,

        /// Number of worker threads (default: all cores)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// JSON file with run parameters
        #[arg(long)]
        config: Option<String>,

        /// Output file path
        #[arg(short, long, default_value = "diffexp_results.tsv")]
        output: String,

        /// Also write the results as JSON to this path
        #[arg(long)]
        json: Option<String>,

        /// Significance threshold for the summary
        #[arg(short, long, default_value = "0.05")]
        alpha: f64,
    },
}

impl Commands {
    /// The run arguments that go through the validation gate
    pub fn diff_exp_args(&self) -> DiffExpArgs {
        match self {
            Commands::Run {
                conditions,
                condition_a,
                condition_b,
                fit_type,
                method,
                gene_limit,
                ..
            } => DiffExpArgs {
                conditions: conditions.clone(),
                condition_a: condition_a.clone(),
                condition_b: condition_b.clone(),
                fit_type: fit_type.clone(),
                method: method.clone(),
                gene_limit: gene_limit.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "rust_diffexp",
            "run",
            "--counts",
            "counts.tsv",
            "--cell-metadata",
            "cells.csv",
            "--conditions",
            "cluster",
            "--condition-a",
            "1",
            "--condition-b",
            "rest",
            "-n",
            "500",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let args = cli.command.diff_exp_args();
        assert_eq!(args, DiffExpArgs::new("cluster", "1", "rest").with_gene_limit("500"));
        let Commands::Run { output, alpha, .. } = cli.command;
        assert_eq!(output, "diffexp_results.tsv");
        assert_eq!(alpha, 0.05);
    }

    #[test]
    fn test_counts_required() {
        assert!(Cli::try_parse_from(["rust_diffexp", "run", "--cell-metadata", "cells.csv"]).is_err());
    }
}
