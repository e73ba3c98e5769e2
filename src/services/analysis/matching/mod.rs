//! Matching engine
//!
//! Four matching/weighting algorithms behind one contract:
//! `(cohort, covariates, config) -> MatchedSample`. Methods are tagged
//! variants dispatched over `MatchMethod`; all four run against the same
//! imputed covariate matrix and configuration so their balance reports are
//! directly comparable.

pub mod iptw;
pub mod mahalanobis;
pub mod nearest;
pub mod propensity;

use rayon::prelude::*;

use crate::config::AnalysisConfig;

use super::error::AnalysisError;
use super::loader;
use super::models::{Cohort, MatchMethod, MatchedSample};

/// Pair-matching runs with fewer matched pairs than this are degenerate.
pub const MIN_MATCHED_PAIRS: usize = 10;

/// Run a single matching method.
pub fn run_method(
    cohort: &Cohort,
    covariates: &[String],
    method: MatchMethod,
    config: &AnalysisConfig,
) -> Result<MatchedSample, AnalysisError> {
    let matrix = loader::imputed_matrix(cohort, covariates);

    match method {
        MatchMethod::Psm => propensity_match(cohort, &matrix, config, None),
        MatchMethod::PsmCaliper => {
            propensity_match(cohort, &matrix, config, Some(config.caliper))
        },
        MatchMethod::Mahalanobis => mahalanobis_match(cohort, &matrix),
        MatchMethod::Iptw => {
            let model = propensity::fit(&matrix, &cohort.treatment, &config.propensity_model)?;
            Ok(iptw::weight(cohort, &model.scores))
        },
    }
}

/// Run all four methods in parallel on the same covariate list and seed.
///
/// Per-method failures are reported alongside the successes; the selector
/// decides what to do with a shrunken field.
pub fn run_all(
    cohort: &Cohort,
    covariates: &[String],
    config: &AnalysisConfig,
) -> Vec<(MatchMethod, Result<MatchedSample, AnalysisError>)> {
    MatchMethod::ALL
        .par_iter()
        .map(|&method| (method, run_method(cohort, covariates, method, config)))
        .collect()
}

fn propensity_match(
    cohort: &Cohort,
    matrix: &ndarray::Array2<f64>,
    config: &AnalysisConfig,
    caliper: Option<f64>,
) -> Result<MatchedSample, AnalysisError> {
    let model = propensity::fit(matrix, &cohort.treatment, &config.propensity_model)?;
    let scores = model.scores;

    let treated = cohort.treated_indices();
    let control = cohort.control_indices();
    let pairs =
        nearest::greedy_pairs(&treated, &control, |t, c| (scores[t] - scores[c]).abs(), caliper);

    let method = if caliper.is_some() { MatchMethod::PsmCaliper } else { MatchMethod::Psm };
    Ok(build_pair_sample(method, pairs, Some(scores)))
}

fn mahalanobis_match(
    cohort: &Cohort,
    matrix: &ndarray::Array2<f64>,
) -> Result<MatchedSample, AnalysisError> {
    let standardized = propensity::standardize(matrix);
    let metric = mahalanobis::MahalanobisMetric::new(standardized)?;

    let treated = cohort.treated_indices();
    let control = cohort.control_indices();
    let pairs =
        nearest::greedy_pairs(&treated, &control, |t, c| metric.squared_distance(t, c), None);

    Ok(build_pair_sample(MatchMethod::Mahalanobis, pairs, None))
}

fn build_pair_sample(
    method: MatchMethod,
    pairs: Vec<(usize, usize)>,
    propensity: Option<Vec<f64>>,
) -> MatchedSample {
    let mut indices = Vec::with_capacity(pairs.len() * 2);
    indices.extend(pairs.iter().map(|&(t, _)| t));
    indices.extend(pairs.iter().map(|&(_, c)| c));

    let degenerate = pairs.len() < MIN_MATCHED_PAIRS;
    if degenerate {
        tracing::warn!(
            "{} produced only {} matched pairs (< {}); marking degenerate",
            method,
            pairs.len(),
            MIN_MATCHED_PAIRS
        );
    }

    MatchedSample { method, indices, pairs: Some(pairs), weights: None, propensity, degenerate }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analysis::models::NumericColumn;

    /// Deterministic confounded cohort: treated units are older on average.
    fn confounded_cohort(n_treated: usize, n_control: usize) -> Cohort {
        let n = n_treated + n_control;
        let mut treatment = vec![1u8; n_treated];
        treatment.extend(vec![0u8; n_control]);

        let mut age = Vec::with_capacity(n);
        for i in 0..n_treated {
            age.push(65.0 + (i % 13) as f64);
        }
        for i in 0..n_control {
            age.push(50.0 + (i % 29) as f64);
        }

        // both covariates imbalanced: sepsis is more prevalent among treated
        let sepsis: Vec<f64> = (0..n)
            .map(|i| {
                let threshold = if i < n_treated { 6 } else { 4 };
                ((i * 7) % 10 < threshold) as u8 as f64
            })
            .collect();

        Cohort {
            n,
            subject_id: (0..n as i64).collect(),
            hadm_id: vec![None; n],
            stay_id: vec![None; n],
            treatment,
            mortality: (0..n).map(|i| ((i * 3) % 10 == 0) as u8).collect(),
            outcome_days: vec![28.0; n],
            outcome_days_original: vec![28.0; n],
            numeric: vec![
                NumericColumn { name: "anchor_age".into(), values: age, integer_like: false },
                NumericColumn { name: "sepsis".into(), values: sepsis, integer_like: true },
            ],
            categorical: vec![],
        }
    }

    fn covariates() -> Vec<String> {
        vec!["anchor_age".to_string(), "sepsis".to_string()]
    }

    #[test]
    fn pair_methods_keep_equal_arm_counts() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        for method in [MatchMethod::Psm, MatchMethod::PsmCaliper, MatchMethod::Mahalanobis] {
            let sample = run_method(&cohort, &covariates(), method, &config).unwrap();
            assert_eq!(
                sample.n_treated(&cohort),
                sample.n_control(&cohort),
                "{method} arms must be symmetric"
            );
        }
    }

    #[test]
    fn caliper_is_respected_on_every_pair() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        let sample =
            run_method(&cohort, &covariates(), MatchMethod::PsmCaliper, &config).unwrap();
        let scores = sample.propensity.as_ref().unwrap();
        for &(t, c) in sample.pairs.as_ref().unwrap() {
            assert!((scores[t] - scores[c]).abs() <= config.caliper + 1e-12);
        }
    }

    #[test]
    fn caliper_matches_are_a_subset_count_of_plain_psm() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        let plain = run_method(&cohort, &covariates(), MatchMethod::Psm, &config).unwrap();
        let calipered =
            run_method(&cohort, &covariates(), MatchMethod::PsmCaliper, &config).unwrap();
        assert!(calipered.n_matched() <= plain.n_matched());
        // without a caliper every treated unit finds some control
        assert_eq!(plain.n_matched(), 40);
    }

    #[test]
    fn iptw_covers_all_rows_with_valid_weights() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        let sample = run_method(&cohort, &covariates(), MatchMethod::Iptw, &config).unwrap();
        assert_eq!(sample.indices.len(), cohort.n);
        let scores = sample.propensity.as_ref().unwrap();
        for p in scores {
            assert!(*p >= iptw::EPSILON && *p <= 1.0 - iptw::EPSILON);
        }
        for w in sample.weights.as_ref().unwrap() {
            assert!(w.is_finite() && *w > 0.0);
        }
    }

    #[test]
    fn tiny_cohort_is_degenerate_but_still_reported() {
        let cohort = confounded_cohort(5, 45);
        let config = AnalysisConfig::default();
        let sample = run_method(&cohort, &covariates(), MatchMethod::Psm, &config).unwrap();
        assert!(sample.degenerate);
        assert!(sample.n_matched() <= 5);
    }

    #[test]
    fn run_all_returns_all_four_methods() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        let results = run_all(&cohort, &covariates(), &config);
        assert_eq!(results.len(), 4);
        for (method, result) in &results {
            assert!(result.is_ok(), "{method} failed: {:?}", result.as_ref().err());
        }
    }

    #[test]
    fn matching_improves_balance_on_confounded_cohort() {
        use crate::services::analysis::balance;
        let cohort = confounded_cohort(60, 500);
        let config = AnalysisConfig::default();
        let covs = covariates();
        for method in [MatchMethod::Psm, MatchMethod::PsmCaliper, MatchMethod::Mahalanobis] {
            let sample = run_method(&cohort, &covs, method, &config).unwrap();
            let report =
                balance::balance_report(&cohort, &sample, &covs, config.smd_balanced_threshold);
            for entry in &report.entries {
                assert!(
                    entry.smd_after.abs() <= entry.smd_before.abs() + 0.05,
                    "{method} worsened balance on {}: before={:.3} after={:.3}",
                    entry.covariate,
                    entry.smd_before,
                    entry.smd_after
                );
            }
        }
    }

    #[test]
    fn reruns_are_bit_identical() {
        let cohort = confounded_cohort(40, 200);
        let config = AnalysisConfig::default();
        let a = run_method(&cohort, &covariates(), MatchMethod::Psm, &config).unwrap();
        let b = run_method(&cohort, &covariates(), MatchMethod::Psm, &config).unwrap();
        assert_eq!(a.pairs, b.pairs);
        assert_eq!(a.propensity, b.propensity);
    }
}
