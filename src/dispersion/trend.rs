//! Dispersion-mean trend fitting

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FitError, InputError};

/// Raw dispersions at or below this are not used for fitting
const MIN_FIT_DISP: f64 = 1e-6;

/// Fewer usable genes than this make the local fit fall back to a constant
const MIN_LOCAL_POINTS: usize = 5;

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendFitMethod {
    /// Parametric fit: dispersion = a0 + a1/mean
    Parametric,
    /// Local quadratic regression of log dispersion on log mean
    Local,
    /// Trimmed mean of the raw dispersions (no trend)
    Mean,
}

impl Default for TrendFitMethod {
    fn default() -> Self {
        TrendFitMethod::Local
    }
}

impl FromStr for TrendFitMethod {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "parametric" => Ok(TrendFitMethod::Parametric),
            "local" => Ok(TrendFitMethod::Local),
            "mean" => Ok(TrendFitMethod::Mean),
            other => Err(InputError::InvalidArgument {
                name: "fit_type".to_string(),
                reason: format!("unknown fit type '{}', use parametric, local or mean", other),
            }),
        }
    }
}

impl fmt::Display for TrendFitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrendFitMethod::Parametric => "parametric",
            TrendFitMethod::Local => "local",
            TrendFitMethod::Mean => "mean",
        };
        write!(f, "{}", name)
    }
}

/// A fitted dispersion function of the mean
#[derive(Debug, Clone)]
pub enum DispersionTrend {
    /// dispersion(mean) = asympt_disp + extra_pois / mean
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Local regression on the log-log scale
    Local(LocfitTree),
    /// Same dispersion for every mean
    Constant(f64),
}

impl DispersionTrend {
    /// Fitted dispersion at a (normalized) mean
    pub fn predict(&self, mean: f64) -> f64 {
        match self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    *asympt_disp
                }
            }
            DispersionTrend::Local(tree) => {
                if mean > 0.0 {
                    tree.predict(mean.ln()).exp()
                } else {
                    f64::NAN
                }
            }
            DispersionTrend::Constant(d) => *d,
        }
    }
}

/// Fit a trend to raw dispersion estimates as a function of mean expression
///
/// Only genes with a positive mean and a raw dispersion above 1e-6 take part.
/// No usable gene at all is a fit failure.
pub fn fit_dispersion_trend(
    means: &[f64],
    dispersions: &[f64],
    method: TrendFitMethod,
    span: f64,
) -> Result<DispersionTrend, FitError> {
    let usable: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions.iter())
        .filter(|(&m, &d)| m > 0.0 && m.is_finite() && d > MIN_FIT_DISP && d.is_finite())
        .map(|(&m, &d)| (m, d))
        .collect();

    if usable.is_empty() {
        return Err(FitError::DispersionFitFailed {
            reason: format!(
                "none of {} genes has a positive dispersion estimate",
                means.len()
            ),
        });
    }

    match method {
        TrendFitMethod::Parametric => match fit_parametric_trend(&usable) {
            Ok((asympt_disp, extra_pois)) => {
                log::debug!(
                    "Parametric dispersion fit: asymptDisp={:.6}, extraPois={:.6}",
                    asympt_disp,
                    extra_pois
                );
                Ok(DispersionTrend::Parametric {
                    asympt_disp,
                    extra_pois,
                })
            }
            Err(e) => {
                log::warn!("Parametric fit failed ({}), using local regression", e);
                Ok(fit_local_trend(&usable, span))
            }
        },
        TrendFitMethod::Local => Ok(fit_local_trend(&usable, span)),
        TrendFitMethod::Mean => Ok(DispersionTrend::Constant(trimmed_mean(&usable))),
    }
}

/// Mean of the usable dispersions with 0.1% trimmed from each end
fn trimmed_mean(data: &[(f64, f64)]) -> f64 {
    let mut disps: Vec<f64> = data.iter().map(|&(_, d)| d).collect();
    disps.sort_by(|a, b| a.total_cmp(b));
    let n = disps.len();
    let trim = ((n as f64) * 0.001).floor() as usize;
    let kept = &disps[trim..n - trim];
    if kept.is_empty() {
        disps.iter().sum::<f64>() / n as f64
    } else {
        kept.iter().sum::<f64>() / kept.len() as f64
    }
}

/// Iterative gamma GLM fit of dispersion = a0 + a1/mean with residual filtering
fn fit_parametric_trend(data: &[(f64, f64)]) -> Result<(f64, f64), FitError> {
    if data.len() < 3 {
        return Err(FitError::TrendFittingFailed {
            reason: "not enough genes for a parametric fit".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for _ in 0..11 {
        let old = coefs;

        // keep genes whose residual lies in (1e-4, 15)
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                fitted > 0.0 && {
                    let residual = disp / fitted;
                    residual > 1e-4 && residual < 15.0
                }
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(FitError::TrendFittingFailed {
                reason: "not enough good residuals for parametric fit".to_string(),
            });
        }

        let (new_coefs, converged) = fit_gamma_glm_identity(&good, coefs);
        coefs = new_coefs;

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(FitError::TrendFittingFailed {
                reason: format!(
                    "coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let log_change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if log_change < 1e-6 && converged {
            return Ok(coefs);
        }
    }

    Err(FitError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma GLM with identity link: y ~ 1 + 1/x
/// Returns ((intercept, slope), converged)
fn fit_gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let mut sum_w = 0.0_f64;
        let mut sum_wx = 0.0_f64;
        let mut sum_wz = 0.0_f64;
        let mut sum_wxx = 0.0_f64;
        let mut sum_wxz = 0.0_f64;

        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sum_w += w;
            sum_wx += w * x;
            sum_wz += w * disp;
            sum_wxx += w * x * x;
            sum_wxz += w * x * disp;
        }

        let det = sum_w * sum_wxx - sum_wx * sum_wx;
        if det.abs() < 1e-10 {
            break;
        }

        a0 = (sum_wxx * sum_wz - sum_wx * sum_wxz) / det;
        a1 = (sum_w * sum_wxz - sum_wx * sum_wz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }

    ((a0, a1), false)
}

/// Local regression of log dispersion on log mean, weighted by mean
fn fit_local_trend(data: &[(f64, f64)], span: f64) -> DispersionTrend {
    if data.len() < MIN_LOCAL_POINTS {
        let constant = data.iter().map(|&(_, d)| d).sum::<f64>() / data.len() as f64;
        log::debug!(
            "Only {} usable genes for local fit, using constant dispersion {:.6}",
            data.len(),
            constant
        );
        return DispersionTrend::Constant(constant);
    }

    let mut points: Vec<(f64, f64, f64)> = data
        .iter()
        .map(|&(m, d)| (m.ln(), d.ln(), m))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let xd: Vec<f64> = points.iter().map(|p| p.0).collect();
    let yd: Vec<f64> = points.iter().map(|p| p.1).collect();
    let weights: Vec<f64> = points.iter().map(|p| p.2).collect();

    DispersionTrend::Local(LocfitTree::build(xd, yd, weights, span, 0.8))
}

/// Evaluation point of the local fit: fitted value and slope at `x`
#[derive(Debug, Clone)]
struct EvalPoint {
    x: f64,
    value: f64,
    deriv: f64,
    h: f64,
}

/// 1D local quadratic regression evaluated on an adaptive grid,
/// Hermite-interpolated in between
#[derive(Debug, Clone)]
pub struct LocfitTree {
    eval_points: Vec<EvalPoint>,
    xd: Vec<f64>,
    yd: Vec<f64>,
    obs_weights: Vec<f64>,
    /// nearest neighbours per local fit
    k: usize,
}

impl LocfitTree {
    /// `xd` must be sorted ascending
    fn build(xd: Vec<f64>, yd: Vec<f64>, obs_weights: Vec<f64>, nn: f64, cut: f64) -> Self {
        let n = xd.len();
        let k = ((n as f64 * nn + 1e-12) as usize).max(3).min(n);

        let mut tree = LocfitTree {
            eval_points: Vec::new(),
            xd,
            yd,
            obs_weights,
            k,
        };

        let x_min = tree.xd[0];
        let x_max = tree.xd[n - 1];
        let left = tree.fit_at_point(x_min);
        let right = tree.fit_at_point(x_max);
        tree.eval_points.push(left);
        tree.eval_points.push(right);
        tree.split_cell(0, 1, cut);

        tree.eval_points.sort_by(|a, b| a.x.total_cmp(&b.x));
        tree
    }

    /// Weighted local quadratic fit at `x` over its k nearest neighbours
    fn fit_at_point(&self, x: f64) -> EvalPoint {
        let n = self.xd.len();

        let z = match self.xd.binary_search_by(|v| v.total_cmp(&x)) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) if idx >= n => n - 1,
            Err(idx) => {
                if (x - self.xd[idx - 1]).abs() <= (self.xd[idx] - x).abs() {
                    idx - 1
                } else {
                    idx
                }
            }
        };

        // grow [l, r] to k points around z
        let (mut l, mut r) = (z, z);
        while r - l + 1 < self.k {
            let can_left = l > 0;
            let can_right = r < n - 1;
            if can_left && (!can_right || (x - self.xd[l - 1]).abs() < (self.xd[r + 1] - x).abs()) {
                l -= 1;
            } else if can_right {
                r += 1;
            } else {
                break;
            }
        }

        let h = (x - self.xd[l])
            .abs()
            .max((self.xd[r] - x).abs())
            .max(1e-10)
            * (1.0 + 1e-9);

        // basis [1, dx, dx²/2]
        let mut m = [[0.0_f64; 3]; 3];
        let mut b = [0.0_f64; 3];
        for j in 0..n {
            let dx = self.xd[j] - x;
            let u = dx.abs() / h;
            if u >= 1.0 {
                continue;
            }
            let t = 1.0 - u * u * u;
            let w = t * t * t * self.obs_weights[j];
            let f = [1.0, dx, dx * dx / 2.0];
            for p in 0..3 {
                b[p] += w * f[p] * self.yd[j];
                for q in 0..3 {
                    m[p][q] += w * f[p] * f[q];
                }
            }
        }

        let (value, deriv) = solve_for_value_and_deriv(&m, &b);
        EvalPoint { x, value, deriv, h }
    }

    /// Split cells wider than `cut` times the smaller bandwidth
    fn split_cell(&mut self, left_idx: usize, right_idx: usize, cut: f64) {
        let left = &self.eval_points[left_idx];
        let right = &self.eval_points[right_idx];
        let width = right.x - left.x;
        let min_h = left.h.min(right.h);

        if width / min_h <= cut || width < 1e-10 {
            return;
        }

        let mid = self.fit_at_point((left.x + right.x) / 2.0);
        let mid_idx = self.eval_points.len();
        self.eval_points.push(mid);

        self.split_cell(left_idx, mid_idx, cut);
        self.split_cell(mid_idx, right_idx, cut);
    }

    /// Predict at `x` (log mean) by Hermite interpolation; linear outside the data range
    fn predict(&self, x: f64) -> f64 {
        let pts = &self.eval_points;
        let n = pts.len();
        let first = &pts[0];
        let last = &pts[n - 1];

        if x <= first.x {
            return first.value + first.deriv * (x - first.x);
        }
        if x >= last.x {
            return last.value + last.deriv * (x - last.x);
        }

        let right_idx = pts.partition_point(|p| p.x <= x).min(n - 1);
        let left = &pts[right_idx - 1];
        let right = &pts[right_idx];

        let d = right.x - left.x;
        if d.abs() < 1e-15 {
            return left.value;
        }
        let t = (x - left.x) / d;

        let phi1 = t * t * (3.0 - 2.0 * t);
        let phi0 = 1.0 - phi1;
        let phi2 = t * (1.0 - t) * (1.0 - t);
        let phi3 = t * t * (t - 1.0);

        phi0 * left.value + phi1 * right.value + d * (phi2 * left.deriv + phi3 * right.deriv)
    }
}

/// Solve the 3x3 normal equations for the intercept and slope
fn solve_for_value_and_deriv(m: &[[f64; 3]; 3], b: &[f64; 3]) -> (f64, f64) {
    let det3 = |a: &[[f64; 3]; 3]| {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };

    let det = det3(m);
    if det.abs() < 1e-15 * m[0][0].max(1.0) * m[1][1].max(1.0) * m[2][2].max(1.0) {
        // singular: weighted mean, flat
        return if m[0][0] > 1e-10 {
            (b[0] / m[0][0], 0.0)
        } else {
            (0.0, 0.0)
        };
    }

    let replace_col = |col: usize| {
        let mut a = *m;
        for row in 0..3 {
            a[row][col] = b[row];
        }
        a
    };

    (det3(&replace_col(0)) / det, det3(&replace_col(1)) / det)
}
