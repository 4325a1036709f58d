//! Dispersion estimation for the negative binomial test
//!
//! Raw per-gene dispersions come from the method of moments on normalized
//! counts. A trend of dispersion against mean is fitted per chunk, and the
//! final value per gene is chosen by the sharing mode.

mod trend;

pub use trend::{fit_dispersion_trend, DispersionTrend, LocfitTree, TrendFitMethod};

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::conditions::Group;
use crate::error::{FitError, InputError};

/// How cells are grouped for the variance estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispersionMethod {
    /// Separate dispersion per condition
    PerCondition,
    /// One dispersion from the within-condition pooled variance
    Pooled,
    /// Ignore the conditions and treat all cells as replicates
    Blind,
}

impl Default for DispersionMethod {
    fn default() -> Self {
        DispersionMethod::PerCondition
    }
}

impl FromStr for DispersionMethod {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "per-condition" => Ok(DispersionMethod::PerCondition),
            "pooled" => Ok(DispersionMethod::Pooled),
            "blind" => Ok(DispersionMethod::Blind),
            other => Err(InputError::InvalidArgument {
                name: "method".to_string(),
                reason: format!(
                    "unknown dispersion method '{}', use per-condition, pooled or blind",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for DispersionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispersionMethod::PerCondition => "per-condition",
            DispersionMethod::Pooled => "pooled",
            DispersionMethod::Blind => "blind",
        };
        write!(f, "{}", name)
    }
}

/// How raw and fitted dispersions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharingMode {
    /// max(raw, fitted)
    Maximum,
    /// fitted only
    FitOnly,
    /// raw only
    GeneEstOnly,
}

impl Default for SharingMode {
    fn default() -> Self {
        SharingMode::Maximum
    }
}

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    pub fit_type: TrendFitMethod,
    pub method: DispersionMethod,
    pub sharing_mode: SharingMode,
    /// Lower bound for every final dispersion
    pub min_disp: f64,
    /// Nearest-neighbour fraction for the local fit
    pub local_span: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            fit_type: TrendFitMethod::Local,
            method: DispersionMethod::PerCondition,
            sharing_mode: SharingMode::Maximum,
            min_disp: 1e-8,
            local_span: 0.7,
        }
    }
}

/// Final dispersions for one chunk, per group
#[derive(Debug, Clone)]
pub struct GroupDispersions {
    pub a: Array1<f64>,
    pub b: Array1<f64>,
}

impl GroupDispersions {
    pub fn get(&self, group: Group) -> &Array1<f64> {
        match group {
            Group::A => &self.a,
            Group::B => &self.b,
        }
    }
}

/// Per-gene mean and method-of-moments dispersion over a set of cells
struct MomentEstimates {
    means: Vec<f64>,
    raw: Vec<f64>,
}

fn mean_of(row: ArrayView1<'_, f64>, cols: &[usize]) -> f64 {
    cols.iter().map(|&j| row[j]).sum::<f64>() / cols.len() as f64
}

fn sum_sq_dev(row: ArrayView1<'_, f64>, cols: &[usize], mean: f64) -> f64 {
    cols.iter().map(|&j| (row[j] - mean).powi(2)).sum()
}

/// mean(1/sf) over the given cells
fn xim(size_factors: &Array1<f64>, cols: &[usize]) -> f64 {
    cols.iter().map(|&j| 1.0 / size_factors[j]).sum::<f64>() / cols.len() as f64
}

/// Moments over one group of cells (sample variance, n - 1)
fn group_moments(
    normalized: ArrayView2<'_, f64>,
    size_factors: &Array1<f64>,
    cols: &[usize],
) -> MomentEstimates {
    let xim = xim(size_factors, cols);
    let dof = (cols.len() - 1) as f64;
    let (means, raw): (Vec<f64>, Vec<f64>) = normalized
        .axis_iter(Axis(0))
        .map(|row| {
            let mean = mean_of(row, cols);
            let var = sum_sq_dev(row, cols, mean) / dof;
            (mean, (var - xim * mean) / (mean * mean))
        })
        .unzip();
    MomentEstimates { means, raw }
}

/// Moments with the variance pooled within groups
fn pooled_moments(
    normalized: ArrayView2<'_, f64>,
    size_factors: &Array1<f64>,
    groups: &[&[usize]],
) -> MomentEstimates {
    let all: Vec<usize> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let xim = xim(size_factors, &all);
    let dof = (all.len() - groups.len()) as f64;
    let (means, raw): (Vec<f64>, Vec<f64>) = normalized
        .axis_iter(Axis(0))
        .map(|row| {
            let mean = mean_of(row, &all);
            let ss: f64 = groups
                .iter()
                .map(|cols| sum_sq_dev(row, cols, mean_of(row, cols)))
                .sum();
            let var = ss / dof;
            (mean, (var - xim * mean) / (mean * mean))
        })
        .unzip();
    MomentEstimates { means, raw }
}

/// Fit the trend and combine it with the raw estimates
fn finalize(moments: &MomentEstimates, params: &DispersionParams, label: &str) -> Result<Array1<f64>, FitError> {
    let trend = fit_dispersion_trend(&moments.means, &moments.raw, params.fit_type, params.local_span)
        .map_err(|e| match e {
            FitError::DispersionFitFailed { reason } => FitError::DispersionFitFailed {
                reason: format!("{} ({})", reason, label),
            },
            other => other,
        })?;

    let finals: Vec<f64> = moments
        .means
        .iter()
        .zip(moments.raw.iter())
        .map(|(&mean, &raw)| {
            let fitted = trend.predict(mean);
            let d = match params.sharing_mode {
                SharingMode::Maximum => {
                    if raw.is_finite() {
                        raw.max(fitted)
                    } else {
                        fitted
                    }
                }
                SharingMode::FitOnly => fitted,
                SharingMode::GeneEstOnly => raw,
            };
            d.max(params.min_disp)
        })
        .collect();

    if let Some(i) = finals.iter().position(|d| !d.is_finite()) {
        return Err(FitError::DispersionFitFailed {
            reason: format!("non-finite dispersion for gene {} ({})", i, label),
        });
    }

    Ok(Array1::from_vec(finals))
}

/// Estimate dispersions for every gene of a chunk
///
/// `normalized` is genes x cells, `a_cols`/`b_cols` are the column positions of
/// the two groups.
pub fn estimate_chunk_dispersions(
    normalized: ArrayView2<'_, f64>,
    size_factors: &Array1<f64>,
    a_cols: &[usize],
    b_cols: &[usize],
    params: &DispersionParams,
) -> Result<GroupDispersions, FitError> {
    let too_small = |group: Group, n: usize| FitError::DispersionFitFailed {
        reason: format!(
            "group {} has {} cell(s); at least two are needed to estimate variance",
            group, n
        ),
    };

    match params.method {
        DispersionMethod::PerCondition => {
            if a_cols.len() < 2 {
                return Err(too_small(Group::A, a_cols.len()));
            }
            if b_cols.len() < 2 {
                return Err(too_small(Group::B, b_cols.len()));
            }
            let a = finalize(&group_moments(normalized, size_factors, a_cols), params, "group A")?;
            let b = finalize(&group_moments(normalized, size_factors, b_cols), params, "group B")?;
            Ok(GroupDispersions { a, b })
        }
        DispersionMethod::Pooled => {
            if a_cols.len() + b_cols.len() < 3 {
                return Err(FitError::DispersionFitFailed {
                    reason: "pooled variance needs at least three cells".to_string(),
                });
            }
            let moments = pooled_moments(normalized, size_factors, &[a_cols, b_cols]);
            let d = finalize(&moments, params, "pooled")?;
            Ok(GroupDispersions { a: d.clone(), b: d })
        }
        DispersionMethod::Blind => {
            let all: Vec<usize> = a_cols.iter().chain(b_cols.iter()).copied().collect();
            let moments = group_moments(normalized, size_factors, &all);
            let d = finalize(&moments, params, "blind")?;
            Ok(GroupDispersions { a: d.clone(), b: d })
        }
    }
}
