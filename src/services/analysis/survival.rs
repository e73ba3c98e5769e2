//! Survival analysis
//!
//! Kaplan-Meier cumulative mortality per arm, a two-sample log-rank test,
//! and a Cox proportional-hazards fit with the treatment indicator as the
//! single covariate. Everything accepts per-row weights so IPTW samples
//! reuse the same code path with weighted risk sets.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::config::AnalysisConfig;

use super::error::AnalysisError;
use super::models::{Cohort, MatchedSample, SurvivalPoint, SurvivalResult};

const MAX_NEWTON_ITER: usize = 50;
const NEWTON_TOL: f64 = 1e-9;
/// |beta| beyond this means the partial likelihood is monotone
/// (complete separation of arms in the risk sets)
const BETA_DIVERGENCE: f64 = 50.0;

/// One subject's contribution to the survival analysis
#[derive(Debug, Clone, Copy)]
struct Subject {
    time: f64,
    event: bool,
    treated: bool,
    weight: f64,
}

/// Fit the survival models on the selected matched sample.
pub fn analyze(
    cohort: &Cohort,
    sample: &MatchedSample,
    config: &AnalysisConfig,
) -> Result<SurvivalResult, AnalysisError> {
    let subjects = collect_subjects(cohort, sample);
    if subjects.is_empty() {
        return Err(AnalysisError::ModelFitFailure("matched sample is empty".into()));
    }

    let treated: Vec<Subject> = subjects.iter().copied().filter(|s| s.treated).collect();
    let control: Vec<Subject> = subjects.iter().copied().filter(|s| !s.treated).collect();
    if treated.is_empty() || control.is_empty() {
        return Err(AnalysisError::ModelFitFailure(
            "both arms must be populated for survival analysis".into(),
        ));
    }

    let n_events: f64 = subjects.iter().filter(|s| s.event).map(|s| s.weight).sum();
    if n_events <= 0.0 {
        return Err(AnalysisError::ModelFitFailure("no events observed in matched sample".into()));
    }

    let horizon = config.follow_up_days;
    let km_treated = kaplan_meier(&treated, horizon);
    let km_control = kaplan_meier(&control, horizon);

    let (beta, information) = fit_cox(&subjects)?;
    let se = 1.0 / information.sqrt();
    let normal = Normal::new(0.0, 1.0).expect("standard normal");
    let z = beta.abs() / se;
    let p_value = 2.0 * (1.0 - normal.cdf(z));
    let z95 = 1.959963984540054;

    let log_rank_p = log_rank_test(&treated, &control)?;
    let concordance_index = concordance(&subjects, beta);

    let weighted_rate = |arm: &[Subject]| -> f64 {
        let total: f64 = arm.iter().map(|s| s.weight).sum();
        if total > 0.0 {
            arm.iter().filter(|s| s.event).map(|s| s.weight).sum::<f64>() / total
        } else {
            0.0
        }
    };

    Ok(SurvivalResult {
        hazard_ratio: beta.exp(),
        ci95_lower: (beta - z95 * se).exp(),
        ci95_upper: (beta + z95 * se).exp(),
        p_value,
        log_rank_p,
        n_treatment: treated.len(),
        n_control: control.len(),
        mortality_rate_treatment: weighted_rate(&treated),
        mortality_rate_control: weighted_rate(&control),
        concordance_index,
        cumulative_mortality_treatment: km_treated,
        cumulative_mortality_control: km_control,
    })
}

fn collect_subjects(cohort: &Cohort, sample: &MatchedSample) -> Vec<Subject> {
    sample
        .indices
        .iter()
        .enumerate()
        .map(|(pos, &row)| Subject {
            time: cohort.outcome_days[row],
            event: cohort.mortality[row] == 1,
            treated: cohort.treatment[row] == 1,
            weight: sample.weights.as_ref().map(|w| w[pos]).unwrap_or(1.0),
        })
        .collect()
}

/// Kaplan-Meier cumulative mortality (1 - S) as a step series on
/// [0, horizon], with the weighted at-risk count just before each step.
fn kaplan_meier(arm: &[Subject], horizon: f64) -> Vec<SurvivalPoint> {
    let mut sorted: Vec<Subject> = arm.to_vec();
    sorted.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());

    let total_weight: f64 = sorted.iter().map(|s| s.weight).sum();
    let mut points = vec![SurvivalPoint {
        day: 0.0,
        cumulative_mortality: 0.0,
        at_risk: total_weight,
    }];

    let mut survival = 1.0;
    let mut i = 0;
    while i < sorted.len() {
        let t = sorted[i].time;
        let mut deaths = 0.0;
        let mut j = i;
        while j < sorted.len() && sorted[j].time == t {
            if sorted[j].event {
                deaths += sorted[j].weight;
            }
            j += 1;
        }

        // at risk just before t: everyone not yet departed
        let at_risk: f64 = sorted[i..].iter().map(|s| s.weight).sum();
        if deaths > 0.0 && at_risk > 0.0 {
            survival *= 1.0 - deaths / at_risk;
            if t <= horizon {
                points.push(SurvivalPoint {
                    day: t,
                    cumulative_mortality: 1.0 - survival,
                    at_risk,
                });
            }
        }

        i = j;
    }

    points
}

/// Weighted at-risk count at a given day (subjects with time >= day).
pub fn at_risk_at(cohort: &Cohort, sample: &MatchedSample, treated: bool, day: f64) -> f64 {
    sample
        .indices
        .iter()
        .enumerate()
        .filter(|(_, &row)| (cohort.treatment[row] == 1) == treated)
        .filter(|(_, &row)| cohort.outcome_days[row] >= day)
        .map(|(pos, _)| sample.weights.as_ref().map(|w| w[pos]).unwrap_or(1.0))
        .sum()
}

/// Newton-Raphson fit of the Breslow partial likelihood with the binary
/// treatment indicator as sole covariate. Returns (beta, information).
fn fit_cox(subjects: &[Subject]) -> Result<(f64, f64), AnalysisError> {
    // descending by time so risk sets accumulate with the sweep
    let mut sorted: Vec<Subject> = subjects.to_vec();
    sorted.sort_by(|a, b| b.time.partial_cmp(&a.time).unwrap());

    let mut beta = 0.0f64;

    for _ in 0..MAX_NEWTON_ITER {
        let (score, info) = cox_derivatives(&sorted, beta);
        if info <= 0.0 || !info.is_finite() {
            return Err(AnalysisError::ModelFitFailure(
                "non-positive information in Cox fit (singular design)".into(),
            ));
        }
        let step = score / info;
        beta += step;

        if beta.abs() > BETA_DIVERGENCE {
            return Err(AnalysisError::ModelFitFailure(
                "Cox partial likelihood is monotone (complete separation)".into(),
            ));
        }
        if step.abs() < NEWTON_TOL {
            let (_, final_info) = cox_derivatives(&sorted, beta);
            if final_info <= 0.0 || !final_info.is_finite() {
                return Err(AnalysisError::ModelFitFailure(
                    "non-positive information at Cox solution".into(),
                ));
            }
            return Ok((beta, final_info));
        }
    }

    Err(AnalysisError::ModelFitFailure(format!(
        "Cox fit did not converge within {} iterations",
        MAX_NEWTON_ITER
    )))
}

/// Score and information of the weighted Breslow partial likelihood at beta.
/// `sorted` must be ordered by descending time.
fn cox_derivatives(sorted: &[Subject], beta: f64) -> (f64, f64) {
    let eb = beta.exp();
    let mut w_treated = 0.0f64; // weight of treated units in the risk set
    let mut w_control = 0.0f64;
    let mut score = 0.0f64;
    let mut info = 0.0f64;

    let mut i = 0;
    while i < sorted.len() {
        let t = sorted[i].time;
        // everyone tied at t enters the risk set before its events count
        let mut j = i;
        while j < sorted.len() && sorted[j].time == t {
            if sorted[j].treated {
                w_treated += sorted[j].weight;
            } else {
                w_control += sorted[j].weight;
            }
            j += 1;
        }

        let s0 = w_control + w_treated * eb;
        let s1 = w_treated * eb;
        if s0 > 0.0 {
            let mean = s1 / s0;
            for subject in &sorted[i..j] {
                if subject.event {
                    let x = if subject.treated { 1.0 } else { 0.0 };
                    score += subject.weight * (x - mean);
                    info += subject.weight * mean * (1.0 - mean);
                }
            }
        }
        i = j;
    }

    (score, info)
}

/// Two-sample log-rank test p-value.
fn log_rank_test(treated: &[Subject], control: &[Subject]) -> Result<f64, AnalysisError> {
    let mut times: Vec<f64> = treated
        .iter()
        .chain(control.iter())
        .filter(|s| s.event)
        .map(|s| s.time)
        .collect();
    times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    times.dedup();

    if times.is_empty() {
        return Err(AnalysisError::ModelFitFailure("no events for log-rank test".into()));
    }

    let mut observed_minus_expected = 0.0f64;
    let mut variance = 0.0f64;

    for &t in &times {
        let n1: f64 = treated.iter().filter(|s| s.time >= t).map(|s| s.weight).sum();
        let n0: f64 = control.iter().filter(|s| s.time >= t).map(|s| s.weight).sum();
        let d1: f64 = treated
            .iter()
            .filter(|s| s.event && s.time == t)
            .map(|s| s.weight)
            .sum();
        let d0: f64 = control
            .iter()
            .filter(|s| s.event && s.time == t)
            .map(|s| s.weight)
            .sum();

        let n = n1 + n0;
        let d = d1 + d0;
        if n <= 1.0 || d <= 0.0 {
            continue;
        }

        let expected = d * n1 / n;
        observed_minus_expected += d1 - expected;
        variance += d * (n1 / n) * (n0 / n) * (n - d) / (n - 1.0);
    }

    if variance <= 0.0 {
        return Err(AnalysisError::ModelFitFailure("zero variance in log-rank test".into()));
    }

    let statistic = observed_minus_expected.powi(2) / variance;
    let chi2 = ChiSquared::new(1.0).expect("chi-squared(1)");
    Ok(1.0 - chi2.cdf(statistic))
}

/// Harrell's concordance index for the fitted single-covariate model.
///
/// With a binary predictor, every comparable pair with identical treatment
/// assignment is a prediction tie and counts one half.
fn concordance(subjects: &[Subject], beta: f64) -> f64 {
    let risk = |s: &Subject| if s.treated { beta.exp() } else { 1.0 };

    let mut concordant = 0.0f64;
    let mut comparable = 0.0f64;

    for (i, a) in subjects.iter().enumerate() {
        for b in subjects.iter().skip(i + 1) {
            // the earlier observed time must be an event for the pair to
            // be orderable
            let (first, second) = if a.time < b.time {
                (a, b)
            } else if b.time < a.time {
                (b, a)
            } else {
                // same time: orderable only when exactly one died
                if a.event == b.event {
                    continue;
                }
                if a.event { (a, b) } else { (b, a) }
            };
            if !first.event {
                continue;
            }

            let w = first.weight * second.weight;
            comparable += w;
            let (r_first, r_second) = (risk(first), risk(second));
            if r_first > r_second {
                concordant += w;
            } else if (r_first - r_second).abs() < 1e-15 {
                concordant += 0.5 * w;
            }
        }
    }

    if comparable > 0.0 { concordant / comparable } else { 0.5 }
}
