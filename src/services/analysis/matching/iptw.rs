//! Inverse-probability-of-treatment weighting
//!
//! Keeps every cohort row and assigns each one the inverse probability of
//! the treatment it actually received. Propensities are clipped away from
//! the boundaries so no weight can explode.

use crate::services::analysis::models::{Cohort, MatchMethod, MatchedSample};

/// Clipping bound for propensity scores
pub const EPSILON: f64 = 0.01;

/// IPTW samples with an effective size below this are degenerate
pub const MIN_EFFECTIVE_SAMPLE: f64 = 20.0;

/// Weight every row by 1/p (treated) or 1/(1-p) (control).
pub fn weight(cohort: &Cohort, propensity: &[f64]) -> MatchedSample {
    let clipped: Vec<f64> = propensity
        .iter()
        .map(|p| p.clamp(EPSILON, 1.0 - EPSILON))
        .collect();

    let indices: Vec<usize> = (0..cohort.n).collect();
    let weights: Vec<f64> = indices
        .iter()
        .map(|&i| {
            if cohort.treatment[i] == 1 {
                1.0 / clipped[i]
            } else {
                1.0 / (1.0 - clipped[i])
            }
        })
        .collect();

    let mut sample = MatchedSample {
        method: MatchMethod::Iptw,
        indices,
        pairs: None,
        weights: Some(weights),
        propensity: Some(clipped),
        degenerate: false,
    };

    let ess = sample.effective_sample_size();
    if ess < MIN_EFFECTIVE_SAMPLE {
        tracing::warn!(
            "IPTW effective sample size {:.1} below {}; marking degenerate",
            ess,
            MIN_EFFECTIVE_SAMPLE
        );
        sample.degenerate = true;
    }

    sample
}
