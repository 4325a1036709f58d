//! Delimited file reading and result export

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use log::info;
use ndarray::Array2;

use super::results::DeResult;
use crate::data::{CellMetadata, CountMatrix};
use crate::error::{DiffExpError, Result};

/// Tab if the first line has one, comma otherwise
fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    Ok(if first.contains('\t') { b'\t' } else { b',' })
}

fn reader(path: &Path, has_headers: bool) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?)
}

/// Read a genes x cells count matrix
///
/// The header row holds cell ids after a leading label; each following row
/// is a gene id followed by one count per cell.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut rdr = reader(path, true)?;

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(DiffExpError::InvalidCountMatrix {
            reason: "header needs a gene column and at least one cell".to_string(),
        });
    }
    let cell_ids: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let gene = record.get(0).unwrap_or_default().to_string();
        for field in record.iter().skip(1) {
            let value = field.parse::<f64>().map_err(|_| DiffExpError::InvalidCountMatrix {
                reason: format!("invalid count '{}' for gene '{}'", field, gene),
            })?;
            values.push(value);
        }
        gene_ids.push(gene);
    }

    if gene_ids.is_empty() {
        return Err(DiffExpError::InvalidCountMatrix {
            reason: "no genes found".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), cell_ids.len()), values).map_err(|e| {
        DiffExpError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    info!(
        "Read {} genes x {} cells from {}",
        gene_ids.len(),
        cell_ids.len(),
        path.display()
    );
    CountMatrix::new(counts, gene_ids, cell_ids)
}

/// Read per-cell categorical annotations
///
/// First column is the cell id; every other column becomes a metadata column
/// named by its header.
pub fn read_cell_metadata<P: AsRef<Path>>(path: P) -> Result<CellMetadata> {
    let path = path.as_ref();
    let mut rdr = reader(path, true)?;

    let headers = rdr.headers()?.clone();
    let column_names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut cell_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
    for record in rdr.records() {
        let record = record?;
        cell_ids.push(record.get(0).unwrap_or_default().to_string());
        for (column, value) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(value.to_string());
        }
    }

    if cell_ids.is_empty() {
        return Err(DiffExpError::InvalidMetadata {
            reason: "no cells found".to_string(),
        });
    }

    let mut metadata = CellMetadata::new(cell_ids);
    for (name, values) in column_names.iter().zip(columns) {
        metadata.add_column(name, values)?;
    }
    info!(
        "Read metadata for {} cells ({} columns)",
        metadata.n_cells(),
        column_names.len()
    );
    Ok(metadata)
}

/// Read a gene ranking, most important gene first
///
/// One gene per line; extra fields are ignored.
pub fn read_gene_ranking<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let mut rdr = reader(path.as_ref(), false)?;
    let mut ranking = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(gene) = record.get(0).filter(|g| !g.is_empty()) {
            ranking.push(gene.to_string());
        }
    }
    Ok(ranking)
}

/// Write the ranked table as tab-separated text
pub fn write_results<P: AsRef<Path>>(path: P, result: &DeResult) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for row in result.rows() {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the ranked table as JSON
pub fn write_results_json<P: AsRef<Path>>(path: P, result: &DeResult) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, result)?;
    Ok(())
}
