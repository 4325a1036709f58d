//! Run configuration

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispersion::DispersionParams;
use crate::error::Result;
use crate::normalization::SizeFactorMethod;
use crate::partition::PartitionPolicy;

/// Tunable parameters of a differential expression run
///
/// Every field has a default, so a JSON file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffExpConfig {
    pub partition: PartitionPolicy,
    pub dispersion: DispersionParams,
    pub size_factor_method: SizeFactorMethod,
    /// Worker threads; `None` uses the global rayon pool
    pub threads: Option<usize>,
}

impl DiffExpConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}
