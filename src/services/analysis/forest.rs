//! Causal forest
//!
//! Heterogeneous treatment-effect estimation on the matched sample: an
//! ensemble of bootstrap causal trees whose splits maximize between-child
//! effect heterogeneity and whose leaves estimate the local difference in
//! outcome means between arms. Matching already conditioned on the
//! covariates, so the effect modifiers double as the only inputs.
//!
//! Rows with missing modifier values are excluded from fitting and receive
//! no estimate; their slots in the per-unit vector stay None.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::CausalForestConfig;
use crate::utils::stats_ext::StatsExt;

use super::error::AnalysisError;
use super::models::{CateResult, CateStats, Cohort, MatchedSample};

const MAX_DEPTH: usize = 25;
/// Candidate split thresholds examined per feature
const SPLIT_CANDIDATES: usize = 8;

enum Node {
    Leaf { tau: f64 },
    Split { feature: usize, threshold: f64, left: Box<Node>, right: Box<Node> },
}

struct Tree {
    root: Node,
    /// Split-gain totals per feature
    gains: Vec<f64>,
}

/// Fit the forest and emit per-unit CATE, the pooled ATE, and importances.
pub fn estimate(
    cohort: &Cohort,
    sample: &MatchedSample,
    covariates: &[String],
    config: &CausalForestConfig,
) -> Result<CateResult, AnalysisError> {
    if covariates.is_empty() {
        return Err(AnalysisError::HeterogeneityFailure(
            "no effect modifiers available".into(),
        ));
    }

    // Raw (un-imputed) modifier matrix over the sample's rows
    let n = sample.indices.len();
    let k = covariates.len();
    let mut features = vec![vec![f64::NAN; k]; n];
    for (j, name) in covariates.iter().enumerate() {
        if let Some(column) = cohort.numeric_column(name) {
            for (pos, &row) in sample.indices.iter().enumerate() {
                features[pos][j] = column.values[row];
            }
        }
    }

    let complete: Vec<usize> = (0..n)
        .filter(|&pos| features[pos].iter().all(|v| v.is_finite()))
        .collect();
    let dropped = n - complete.len();
    if dropped > 0 {
        tracing::debug!("Causal forest drops {} incomplete rows of {}", dropped, n);
    }

    if complete.len() < 2 * config.min_samples_leaf {
        return Err(AnalysisError::HeterogeneityFailure(format!(
            "only {} complete rows for min_samples_leaf={}",
            complete.len(),
            config.min_samples_leaf
        )));
    }

    let outcome: Vec<f64> = sample
        .indices
        .iter()
        .map(|&row| cohort.mortality[row] as f64)
        .collect();
    let treated: Vec<bool> = sample
        .indices
        .iter()
        .map(|&row| cohort.treatment[row] == 1)
        .collect();

    let n_treated = complete.iter().filter(|&&pos| treated[pos]).count();
    if n_treated == 0 || n_treated == complete.len() {
        return Err(AnalysisError::HeterogeneityFailure(
            "complete cases cover only one treatment arm".into(),
        ));
    }

    let data = TreeData { features: &features, outcome: &outcome, treated: &treated, config };

    // Per-tree seeds derived from the configured state keep the forest
    // reproducible regardless of worker scheduling.
    let trees: Vec<Tree> = (0..config.n_estimators)
        .into_par_iter()
        .map(|index| {
            let seed = config
                .random_state
                .wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            grow_tree(&data, &complete, StdRng::seed_from_u64(seed))
        })
        .collect();

    // Per-unit CATE: average of the trees' leaf estimates
    let mut cate_per_unit: Vec<Option<f64>> = vec![None; n];
    for &pos in &complete {
        let sum: f64 = trees.iter().map(|t| predict(&t.root, &features[pos])).sum();
        cate_per_unit[pos] = Some(sum / trees.len() as f64);
    }

    let estimates: Vec<f64> = cate_per_unit.iter().flatten().copied().collect();
    let ate = estimates.mean_ignore_nan().unwrap_or(0.0);
    let cate_stats = CateStats {
        mean: ate,
        sd: estimates.std_ignore_nan().unwrap_or(0.0),
        min: estimates.min_ignore_nan().unwrap_or(0.0),
        max: estimates.max_ignore_nan().unwrap_or(0.0),
        positive_rate: estimates.iter().filter(|v| **v > 0.0).count() as f64
            / estimates.len().max(1) as f64,
    };

    // Importance: normalized split-gain totals; a forest with no splits
    // (homogeneous effect) reports uniform weights
    let mut gain_totals = vec![0.0f64; k];
    for tree in &trees {
        for (j, gain) in tree.gains.iter().enumerate() {
            gain_totals[j] += gain;
        }
    }
    let total: f64 = gain_totals.iter().sum();
    let mut feature_importances: Vec<(String, f64)> = covariates
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let importance =
                if total > 0.0 { gain_totals[j] / total } else { 1.0 / k as f64 };
            (name.clone(), importance)
        })
        .collect();
    feature_importances.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));

    Ok(CateResult { ate, cate_per_unit, cate_stats, feature_importances })
}

struct TreeData<'a> {
    features: &'a [Vec<f64>],
    outcome: &'a [f64],
    treated: &'a [bool],
    config: &'a CausalForestConfig,
}

fn grow_tree(data: &TreeData<'_>, complete: &[usize], mut rng: StdRng) -> Tree {
    // bootstrap sample of the complete rows
    let mut rows: Vec<usize> = (0..complete.len())
        .map(|_| complete[rng.gen_range(0..complete.len())])
        .collect();
    // both arms must survive the bootstrap; resample a few times if not
    for _ in 0..10 {
        let has_both = rows.iter().any(|&r| data.treated[r])
            && rows.iter().any(|&r| !data.treated[r]);
        if has_both {
            break;
        }
        rows = (0..complete.len())
            .map(|_| complete[rng.gen_range(0..complete.len())])
            .collect();
    }

    let mut gains = vec![0.0f64; data.features[0].len()];
    let root = split_node(data, rows, 0, &mut rng, &mut gains);
    Tree { root, gains }
}

fn effect(data: &TreeData<'_>, rows: &[usize]) -> Option<f64> {
    let mut sum_t = 0.0;
    let mut n_t = 0usize;
    let mut sum_c = 0.0;
    let mut n_c = 0usize;
    for &r in rows {
        if data.treated[r] {
            sum_t += data.outcome[r];
            n_t += 1;
        } else {
            sum_c += data.outcome[r];
            n_c += 1;
        }
    }
    if n_t == 0 || n_c == 0 {
        return None;
    }
    Some(sum_t / n_t as f64 - sum_c / n_c as f64)
}

fn split_node(
    data: &TreeData<'_>,
    rows: Vec<usize>,
    depth: usize,
    rng: &mut StdRng,
    gains: &mut [f64],
) -> Node {
    let tau = effect(data, &rows).unwrap_or(0.0);
    let min_leaf = data.config.min_samples_leaf;
    if depth >= MAX_DEPTH || rows.len() < 2 * min_leaf {
        return Node::Leaf { tau };
    }

    let k = data.features[0].len();
    let n_try = (k as f64).sqrt().ceil() as usize;
    let mut candidates: Vec<usize> = (0..k).collect();
    // partial Fisher-Yates picks the feature subset for this node
    for i in 0..n_try.min(k) {
        let j = rng.gen_range(i..k);
        candidates.swap(i, j);
    }
    candidates.truncate(n_try.min(k));
    candidates.sort_unstable();

    let parent_score = rows.len() as f64 * tau * tau;
    let mut best: Option<(usize, f64, f64, Vec<usize>, Vec<usize>)> = None;

    for &feature in &candidates {
        let mut values: Vec<f64> = rows.iter().map(|&r| data.features[r][feature]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values.dedup();
        if values.len() < 2 {
            continue;
        }

        let step = (values.len() as f64 / (SPLIT_CANDIDATES + 1) as f64).max(1.0);
        let mut thresholds: Vec<f64> = (1..=SPLIT_CANDIDATES)
            .map(|q| {
                let idx = ((q as f64 * step) as usize).min(values.len() - 2);
                (values[idx] + values[idx + 1]) / 2.0
            })
            .collect();
        thresholds.dedup();

        for threshold in thresholds {
            let (left, right): (Vec<usize>, Vec<usize>) =
                rows.iter().copied().partition(|&r| data.features[r][feature] <= threshold);
            if left.len() < min_leaf || right.len() < min_leaf {
                continue;
            }
            let (Some(tau_l), Some(tau_r)) = (effect(data, &left), effect(data, &right)) else {
                continue;
            };

            let score = left.len() as f64 * tau_l * tau_l + right.len() as f64 * tau_r * tau_r;
            let gain = score - parent_score;
            if gain > 1e-12
                && best
                    .as_ref()
                    .map_or(true, |(_, _, best_gain, _, _)| gain > *best_gain)
            {
                best = Some((feature, threshold, gain, left, right));
            }
        }
    }

    match best {
        Some((feature, threshold, gain, left, right)) => {
            gains[feature] += gain;
            Node::Split {
                feature,
                threshold,
                left: Box::new(split_node(data, left, depth + 1, rng, gains)),
                right: Box::new(split_node(data, right, depth + 1, rng, gains)),
            }
        },
        None => Node::Leaf { tau },
    }
}

fn predict(node: &Node, features: &[f64]) -> f64 {
    match node {
        Node::Leaf { tau } => *tau,
        Node::Split { feature, threshold, left, right } => {
            if features[*feature] <= *threshold {
                predict(left, features)
            } else {
                predict(right, features)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analysis::models::{MatchMethod, NumericColumn};

    /// Cohort where the treatment effect flips sign with age: harmful for
    /// the old, protective for the young.
    fn heterogeneous_cohort(n: usize) -> (Cohort, MatchedSample, Vec<String>) {
        let mut treatment = Vec::with_capacity(n);
        let mut mortality = Vec::with_capacity(n);
        let mut age = Vec::with_capacity(n);
        let mut noise = Vec::with_capacity(n);

        for i in 0..n {
            let treated = i % 2 == 0;
            let old = i % 4 < 2;
            treatment.push(treated as u8);
            age.push(if old { 80.0 } else { 40.0 });
            noise.push(((i * 31) % 17) as f64);
            let dies = if treated {
                if old { (i * 13) % 10 < 8 } else { (i * 13) % 10 < 1 }
            } else {
                (i * 13) % 10 < 4
            };
            mortality.push(dies as u8);
        }

        let cohort = Cohort {
            n,
            subject_id: (0..n as i64).collect(),
            hadm_id: vec![None; n],
            stay_id: vec![None; n],
            treatment,
            mortality,
            outcome_days: vec![28.0; n],
            outcome_days_original: vec![28.0; n],
            numeric: vec![
                NumericColumn { name: "anchor_age".into(), values: age, integer_like: false },
                NumericColumn { name: "wbc".into(), values: noise, integer_like: false },
            ],
            categorical: vec![],
        };
        let sample = MatchedSample {
            method: MatchMethod::Psm,
            indices: (0..n).collect(),
            pairs: None,
            weights: None,
            propensity: None,
            degenerate: false,
        };
        (cohort, sample, vec!["anchor_age".to_string(), "wbc".to_string()])
    }

    fn small_config() -> CausalForestConfig {
        CausalForestConfig { n_estimators: 40, min_samples_leaf: 10, random_state: 42 }
    }

    #[test]
    fn detects_age_driven_heterogeneity() {
        let (cohort, sample, covariates) = heterogeneous_cohort(400);
        let result = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();

        // effect estimates should separate the two age groups
        let old_mean: Vec<f64> = (0..400)
            .filter(|i| cohort.numeric[0].values[*i] > 60.0)
            .filter_map(|i| result.cate_per_unit[i])
            .collect();
        let young_mean: Vec<f64> = (0..400)
            .filter(|i| cohort.numeric[0].values[*i] < 60.0)
            .filter_map(|i| result.cate_per_unit[i])
            .collect();
        let old_avg = old_mean.iter().sum::<f64>() / old_mean.len() as f64;
        let young_avg = young_mean.iter().sum::<f64>() / young_mean.len() as f64;
        assert!(old_avg > 0.15, "old CATE = {old_avg}");
        assert!(young_avg < 0.0, "young CATE = {young_avg}");

        // age must dominate the noise column in the importances
        assert_eq!(result.feature_importances[0].0, "anchor_age");
        assert!(result.feature_importances[0].1 > 0.5);
    }

    #[test]
    fn importances_are_normalized() {
        let (cohort, sample, covariates) = heterogeneous_cohort(200);
        let result = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();
        let sum: f64 = result.feature_importances.iter().map(|(_, v)| v).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for (_, importance) in &result.feature_importances {
            assert!(*importance >= 0.0);
        }
    }

    #[test]
    fn incomplete_rows_get_no_estimate() {
        let (mut cohort, sample, covariates) = heterogeneous_cohort(200);
        cohort.numeric[0].values[7] = f64::NAN;
        cohort.numeric[1].values[11] = f64::NAN;
        let result = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();
        assert!(result.cate_per_unit[7].is_none());
        assert!(result.cate_per_unit[11].is_none());
        assert!(result.cate_per_unit[0].is_some());
    }

    #[test]
    fn too_few_complete_rows_fail() {
        let (cohort, mut sample, covariates) = heterogeneous_cohort(200);
        sample.indices.truncate(12);
        let err = estimate(&cohort, &sample, &covariates, &small_config()).unwrap_err();
        assert!(matches!(err, AnalysisError::HeterogeneityFailure(_)));
    }

    #[test]
    fn fixed_seed_reproduces_estimates() {
        let (cohort, sample, covariates) = heterogeneous_cohort(200);
        let a = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();
        let b = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();
        assert_eq!(a.cate_per_unit, b.cate_per_unit);
        assert_eq!(a.feature_importances, b.feature_importances);
        assert_eq!(a.ate, b.ate);
    }

    #[test]
    fn stats_summarize_the_estimates() {
        let (cohort, sample, covariates) = heterogeneous_cohort(400);
        let result = estimate(&cohort, &sample, &covariates, &small_config()).unwrap();
        assert!(result.cate_stats.min <= result.cate_stats.mean);
        assert!(result.cate_stats.mean <= result.cate_stats.max);
        assert!(result.cate_stats.sd > 0.0);
        assert!((0.0..=1.0).contains(&result.cate_stats.positive_rate));
    }
}
