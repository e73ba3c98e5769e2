//! Shared fixtures for cross-service tests
//!
//! Seeded synthetic ICU cohorts written as CSV files, shaped like the
//! upstream cohort builder's output (core columns, baseline covariates,
//! and a post-treatment `los` column that must never enter matching).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::path::{Path, PathBuf};

pub const COHORT_HEADER: &str =
    "subject_id,hadm_id,stay_id,treatment_group,mortality,outcome_days,anchor_age,sepsis,los";

struct Row {
    treated: bool,
    mortality: u8,
    outcome_days: f64,
    age: f64,
    sepsis: u8,
    los: f64,
}

fn render_csv(rows: &[Row]) -> String {
    let mut out = String::from(COHORT_HEADER);
    out.push('\n');
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "{},{},{},{},{},{:.2},{:.2},{},{:.2}\n",
            i + 1,
            10_000 + i,
            20_000 + i,
            row.treated as u8,
            row.mortality,
            row.outcome_days,
            row.age,
            row.sepsis,
            row.los,
        ));
    }
    out
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Scenario A: no confounding, outcome independent of assignment.
///
/// Age ~ N(65, 10) and sepsis ~ Bernoulli(0.4) in both arms. Mortality is
/// 30% in each arm exactly (three of every ten subjects, on a shared
/// death-day cycle), keeping the per-arm hazards identical. A few
/// survivors carry follow-up past the 28-day horizon to exercise
/// censoring.
pub fn balanced_cohort(n: usize, n_treated: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let age_dist = Normal::new(65.0, 10.0).unwrap();

    let rows: Vec<Row> = (0..n)
        .map(|i| {
            let age: f64 = age_dist.sample(&mut rng);
            let sepsis = rng.gen_bool(0.4) as u8;
            let dies = i % 10 < 3;
            let outcome_days = if dies {
                1.0 + ((i * 7) % 27) as f64
            } else if i % 20 == 4 {
                29.0 + (i % 10) as f64
            } else {
                28.0
            };
            Row {
                treated: i < n_treated,
                mortality: dies as u8,
                outcome_days,
                age,
                sepsis,
                los: rng.gen_range(1.0..20.0),
            }
        })
        .collect();

    render_csv(&rows)
}

/// Scenario B: confounded assignment.
///
/// Treated units are older (mean 66 vs 60) and more septic (0.55 vs 0.35);
/// mortality depends on age and sepsis but not on treatment, so the raw
/// hazard ratio is biased upward until matching removes the imbalance.
pub fn confounded_cohort(n: usize, n_treated: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let treated_age = Normal::new(66.0, 10.0).unwrap();
    let control_age = Normal::new(60.0, 10.0).unwrap();

    let rows: Vec<Row> = (0..n)
        .map(|i| {
            let treated = i < n_treated;
            let age: f64 = if treated {
                treated_age.sample(&mut rng)
            } else {
                control_age.sample(&mut rng)
            };
            let sepsis = rng.gen_bool(if treated { 0.55 } else { 0.35 }) as u8;
            let p_death = sigmoid(0.09 * (age - 65.0) + 1.0 * sepsis as f64 - 1.1);
            let dies = rng.gen_bool(p_death);
            let outcome_days = if dies { rng.gen_range(1.0..28.0) } else { 28.0 };
            Row {
                treated,
                mortality: dies as u8,
                outcome_days,
                age,
                sepsis,
                los: rng.gen_range(1.0..20.0),
            }
        })
        .collect();

    render_csv(&rows)
}

/// Scenario C: far too small for stable matching (5 treated of 50).
pub fn degenerate_cohort(seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let age_dist = Normal::new(65.0, 10.0).unwrap();

    let rows: Vec<Row> = (0..50)
        .map(|i| {
            let age: f64 = age_dist.sample(&mut rng);
            let dies = rng.gen_bool(0.25);
            let outcome_days = if dies { rng.gen_range(1.0..28.0) } else { 28.0 };
            Row {
                treated: i < 5,
                mortality: dies as u8,
                outcome_days,
                age,
                sepsis: rng.gen_bool(0.4) as u8,
                los: rng.gen_range(1.0..20.0),
            }
        })
        .collect();

    render_csv(&rows)
}

/// Write a cohort CSV into `dir` and return its path.
pub fn write_cohort(dir: &Path, csv: &str) -> PathBuf {
    let path = dir.join("cohort.csv");
    std::fs::write(&path, csv).unwrap();
    path
}
