//! Mahalanobis distance over the standardized covariate matrix
//!
//! The covariance matrix is estimated on the full (imputed, standardized)
//! cohort and inverted once; a ridge term is escalated until the inverse
//! exists so collinear covariate sets degrade gracefully instead of
//! aborting the method.

use ndarray::{Array1, Array2};

use crate::services::analysis::error::AnalysisError;

use super::propensity::solve;

/// Precomputed inverse covariance for Mahalanobis lookups
pub struct MahalanobisMetric {
    inverse_covariance: Array2<f64>,
    matrix: Array2<f64>,
}

impl MahalanobisMetric {
    /// Build the metric from a standardized covariate matrix (n x k).
    pub fn new(standardized: Array2<f64>) -> Result<Self, AnalysisError> {
        let n = standardized.nrows();
        let k = standardized.ncols();
        if n < 2 || k == 0 {
            return Err(AnalysisError::ModelFitFailure(
                "Mahalanobis metric needs at least 2 rows and 1 covariate".into(),
            ));
        }

        let means = standardized.mean_axis(ndarray::Axis(0)).unwrap();
        let centered = &standardized - &means;
        let mut covariance = centered.t().dot(&centered) / (n as f64 - 1.0);

        // Escalating ridge until the matrix inverts
        let mut inverse = invert(&covariance);
        let mut ridge = 1e-8;
        while inverse.is_none() && ridge <= 1.0 {
            for j in 0..k {
                covariance[[j, j]] += ridge;
            }
            inverse = invert(&covariance);
            ridge *= 10.0;
        }

        let inverse_covariance = inverse.ok_or_else(|| {
            AnalysisError::ModelFitFailure("covariance matrix is not invertible".into())
        })?;

        Ok(Self { inverse_covariance, matrix: standardized })
    }

    /// Squared Mahalanobis distance between two cohort rows.
    pub fn squared_distance(&self, a: usize, b: usize) -> f64 {
        let diff: Array1<f64> = (&self.matrix.row(a) - &self.matrix.row(b)).to_owned();
        diff.dot(&self.inverse_covariance.dot(&diff))
    }
}

fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let k = matrix.nrows();
    let mut inverse = Array2::<f64>::zeros((k, k));
    for j in 0..k {
        let mut unit = Array1::<f64>::zeros(k);
        unit[j] = 1.0;
        let column = solve(matrix, &unit)?;
        for i in 0..k {
            inverse[[i, j]] = column[i];
        }
    }
    Some(inverse)
}
