//! rust_diffexp command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_diffexp::cli::{Cli, Commands};
use rust_diffexp::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(&cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: &Commands) -> Result<()> {
    let args = command.diff_exp_args();
    let Commands::Run {
        counts,
        cell_metadata,
        ranking,
        threads,
        config,
        output,
        json,
        alpha,
        ..
    } = command;

    let mut run_config = match config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            DiffExpConfig::from_json_file(path)?
        }
        None => DiffExpConfig::default(),
    };
    if let Some(n) = threads {
        run_config.threads = Some(*n);
    }

    info!("Loading count matrix from: {}", counts);
    let matrix = read_count_matrix(counts)?;

    info!("Loading cell metadata from: {}", cell_metadata);
    let metadata = read_cell_metadata(cell_metadata)?;

    let mut dataset = ExpressionDataset::new(matrix, metadata)?;
    if let Some(path) = ranking {
        info!("Loading gene ranking from: {}", path);
        dataset = dataset.with_ranking(read_gene_ranking(path)?)?;
    }

    let result = run_diff_expression_with(&dataset, &args, &run_config)?;

    write_results(output, &result)?;
    info!("Results written to: {}", output);
    if let Some(path) = json {
        write_results_json(path, &result)?;
        info!("JSON results written to: {}", path);
    }

    print!("{}", result.summary(*alpha));
    Ok(())
}
