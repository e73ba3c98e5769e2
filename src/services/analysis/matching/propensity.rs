//! Logistic propensity model
//!
//! L2-penalized logistic regression fit by iteratively reweighted least
//! squares on the standardized covariate matrix. The fit is fully
//! deterministic: fixed initialization, fixed iteration order, and a ridge
//! penalty that keeps the normal equations invertible even for collinear
//! covariates.

use ndarray::{Array1, Array2, Axis};

use crate::config::PropensityModelConfig;
use crate::services::analysis::error::AnalysisError;

/// Ridge strength on non-intercept coefficients (mirrors the usual
/// logistic-regression default of C = 1.0)
const L2_PENALTY: f64 = 1.0;
const CONVERGENCE_TOL: f64 = 1e-8;

/// Fitted propensity model
#[derive(Debug, Clone)]
pub struct PropensityModel {
    /// Intercept followed by standardized-scale coefficients
    pub coefficients: Vec<f64>,
    /// P(treated | covariates) per cohort row
    pub scores: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Fit the propensity model on an imputed covariate matrix.
///
/// `matrix` is row-major (n x k) with missing values already imputed;
/// `treatment` holds the 0/1 assignment per row.
pub fn fit(
    matrix: &Array2<f64>,
    treatment: &[u8],
    config: &PropensityModelConfig,
) -> Result<PropensityModel, AnalysisError> {
    let n = matrix.nrows();
    if n == 0 || n != treatment.len() {
        return Err(AnalysisError::ModelFitFailure(
            "propensity design matrix is empty or misaligned".into(),
        ));
    }
    let n_treated = treatment.iter().filter(|&&t| t == 1).count();
    if n_treated == 0 || n_treated == n {
        return Err(AnalysisError::ModelFitFailure(
            "propensity model needs both treated and control units".into(),
        ));
    }

    let standardized = standardize(matrix);
    let k = standardized.ncols();

    // Design with leading intercept column
    let mut design = Array2::ones((n, k + 1));
    design.slice_mut(ndarray::s![.., 1..]).assign(&standardized);

    let y: Array1<f64> = treatment.iter().map(|&t| t as f64).collect();
    let mut beta = Array1::<f64>::zeros(k + 1);

    let mut converged = false;
    let mut iterations = 0;
    for iter in 0..config.max_iter {
        iterations = iter + 1;

        let eta = design.dot(&beta);
        let p = eta.mapv(sigmoid);
        let w = p.mapv(|v| v * (1.0 - v));

        // Gradient of the penalized log-likelihood
        let residual = &y - &p;
        let mut gradient = design.t().dot(&residual);
        for j in 1..=k {
            gradient[j] -= L2_PENALTY * beta[j];
        }

        // Hessian: X^T W X + penalty (intercept unpenalized)
        let weighted = &design * &w.clone().insert_axis(Axis(1));
        let mut hessian = design.t().dot(&weighted);
        for j in 1..=k {
            hessian[[j, j]] += L2_PENALTY;
        }

        let delta = solve(&hessian, &gradient).ok_or_else(|| {
            AnalysisError::ModelFitFailure("singular Hessian in propensity IRLS".into())
        })?;

        beta += &delta;

        if delta.iter().map(|d| d.abs()).fold(0.0, f64::max) < CONVERGENCE_TOL {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            "Propensity IRLS stopped at max_iter={} without convergence",
            config.max_iter
        );
    }

    let scores: Vec<f64> = design.dot(&beta).mapv(sigmoid).to_vec();
    if scores.iter().any(|s| s.is_nan()) {
        return Err(AnalysisError::ModelFitFailure("propensity scores contain NaN".into()));
    }

    Ok(PropensityModel { coefficients: beta.to_vec(), scores, iterations, converged })
}

/// Column-wise standardization; constant columns pass through centered.
pub fn standardize(matrix: &Array2<f64>) -> Array2<f64> {
    let mut out = matrix.clone();
    for mut column in out.columns_mut() {
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let sd = var.sqrt();
        if sd > 0.0 {
            column.mapv_inplace(|v| (v - mean) / sd);
        } else {
            column.mapv_inplace(|v| v - mean);
        }
    }
    out
}

fn sigmoid(x: f64) -> f64 {
    // Split form avoids overflow for large negative arguments
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Solve A x = b by Gaussian elimination with partial pivoting.
pub(crate) fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    let mut aug = Array2::<f64>::zeros((n, n + 1));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.slice_mut(ndarray::s![.., n]).assign(b);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| aug[[i, col]].abs().partial_cmp(&aug[[j, col]].abs()).unwrap())?;
        if aug[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        for row in (col + 1)..n {
            let factor = aug[[row, col]] / aug[[col, col]];
            for j in col..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut sum = aug[[row, n]];
        for j in (row + 1)..n {
            sum -= aug[[row, j]] * x[j];
        }
        x[row] = sum / aug[[row, row]];
    }
    Some(x)
}
