//! Balance diagnostics
//!
//! Standardized mean differences between treatment arms, computed before
//! and after matching over the same covariate list so the love plot can
//! render both sides. Weighted variants cover IPTW samples.

use crate::utils::stats_ext::{weighted_mean, weighted_variance, StatsExt};

use super::models::{BalanceEntry, BalanceReport, Cohort, MatchedSample};
use super::registry::{self, SemanticType};

/// Balance tier for a single covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceTier {
    /// |SMD| < 0.1
    Balanced,
    /// 0.1 <= |SMD| < 0.2
    Acceptable,
    /// |SMD| >= 0.2
    Imbalanced,
}

impl BalanceTier {
    pub fn classify(smd: f64) -> Self {
        let abs = smd.abs();
        if abs < 0.1 {
            Self::Balanced
        } else if abs < 0.2 {
            Self::Acceptable
        } else {
            Self::Imbalanced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Acceptable => "acceptable",
            Self::Imbalanced => "imbalanced",
        }
    }
}

/// SMD between two unweighted samples of a numeric covariate.
///
/// (mean_t - mean_c) / pooled_sd with pooled_sd = sqrt((var_t + var_c) / 2);
/// zero when the pooled deviation vanishes or either arm is empty. The same
/// formula covers binary and ordinal covariates treated as numeric.
pub fn smd_numeric(treated: &[f64], control: &[f64]) -> f64 {
    let (Some(mean_t), Some(mean_c)) = (treated.mean_ignore_nan(), control.mean_ignore_nan())
    else {
        return 0.0;
    };
    let var_t = treated.variance_ignore_nan().unwrap_or(0.0);
    let var_c = control.variance_ignore_nan().unwrap_or(0.0);
    let pooled_sd = ((var_t + var_c) / 2.0).sqrt();
    if pooled_sd > 0.0 { (mean_t - mean_c) / pooled_sd } else { 0.0 }
}

/// Weighted SMD for IPTW samples.
pub fn smd_numeric_weighted(
    treated: &[f64],
    treated_weights: &[f64],
    control: &[f64],
    control_weights: &[f64],
) -> f64 {
    let (Some(mean_t), Some(mean_c)) = (
        weighted_mean(treated, treated_weights),
        weighted_mean(control, control_weights),
    ) else {
        return 0.0;
    };
    let var_t = weighted_variance(treated, treated_weights).unwrap_or(0.0);
    let var_c = weighted_variance(control, control_weights).unwrap_or(0.0);
    let pooled_sd = ((var_t + var_c) / 2.0).sqrt();
    if pooled_sd > 0.0 { (mean_t - mean_c) / pooled_sd } else { 0.0 }
}

/// SMD of a categorical covariate: per-level dummy SMDs, represented by the
/// level with the largest absolute imbalance.
pub fn smd_categorical(
    levels: &[String],
    treated: &[Option<String>],
    control: &[Option<String>],
) -> f64 {
    let mut worst = 0.0f64;
    for level in levels {
        let dummy = |values: &[Option<String>]| -> Vec<f64> {
            values
                .iter()
                .map(|v| match v {
                    Some(val) => {
                        if val == level {
                            1.0
                        } else {
                            0.0
                        }
                    },
                    None => f64::NAN,
                })
                .collect()
        };
        let smd = smd_numeric(&dummy(treated), &dummy(control));
        if smd.abs() > worst.abs() {
            worst = smd;
        }
    }
    worst
}

/// SMD for one covariate between two index sets of a cohort, with optional
/// per-row weights (IPTW). Dispatches on the registry's semantic type.
pub fn smd_for(
    cohort: &Cohort,
    covariate: &str,
    treated_rows: &[usize],
    control_rows: &[usize],
    weights: Option<(&[f64], &[f64])>,
) -> f64 {
    if registry::type_of(covariate) == Some(SemanticType::Categorical) {
        if let Some(column) = cohort.categorical_column(covariate) {
            let levels = column.levels();
            let gather = |rows: &[usize]| -> Vec<Option<String>> {
                rows.iter().map(|&i| column.values[i].clone()).collect()
            };
            return smd_categorical(&levels, &gather(treated_rows), &gather(control_rows));
        }
        return 0.0;
    }

    let Some(column) = cohort.numeric_column(covariate) else {
        return 0.0;
    };
    let gather = |rows: &[usize]| -> Vec<f64> { rows.iter().map(|&i| column.values[i]).collect() };
    let treated = gather(treated_rows);
    let control = gather(control_rows);

    match weights {
        Some((wt, wc)) => smd_numeric_weighted(&treated, wt, &control, wc),
        None => smd_numeric(&treated, &control),
    }
}

/// Before/after balance over the same covariate list.
///
/// Before is always computed on the full, unweighted cohort; after uses the
/// matched sample's rows (and its weights when present).
pub fn balance_report(
    cohort: &Cohort,
    sample: &MatchedSample,
    covariates: &[String],
    balanced_threshold: f64,
) -> BalanceReport {
    let all_treated = cohort.treated_indices();
    let all_control = cohort.control_indices();

    let mut sample_treated = Vec::new();
    let mut sample_control = Vec::new();
    let mut treated_weights = Vec::new();
    let mut control_weights = Vec::new();
    for (pos, &row) in sample.indices.iter().enumerate() {
        let weight = sample.weights.as_ref().map(|w| w[pos]).unwrap_or(1.0);
        if cohort.treatment[row] == 1 {
            sample_treated.push(row);
            treated_weights.push(weight);
        } else {
            sample_control.push(row);
            control_weights.push(weight);
        }
    }
    let after_weights = sample
        .weights
        .is_some()
        .then_some((treated_weights.as_slice(), control_weights.as_slice()));

    let mut entries = Vec::with_capacity(covariates.len());
    for covariate in covariates {
        let smd_before = smd_for(cohort, covariate, &all_treated, &all_control, None);
        let smd_after =
            smd_for(cohort, covariate, &sample_treated, &sample_control, after_weights);
        entries.push(BalanceEntry {
            covariate: covariate.clone(),
            smd_before,
            smd_after,
            balanced: smd_after.abs() < balanced_threshold,
        });
    }

    let (mean_abs_smd, pct_balanced) = if entries.is_empty() {
        (f64::NAN, 0.0)
    } else {
        let mean = entries.iter().map(|e| e.smd_after.abs()).sum::<f64>() / entries.len() as f64;
        let balanced = entries.iter().filter(|e| e.balanced).count();
        (mean, balanced as f64 / entries.len() as f64)
    };

    BalanceReport { entries, mean_abs_smd, pct_balanced }
}
