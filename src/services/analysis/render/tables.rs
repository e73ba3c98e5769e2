//! Tabular artifacts
//!
//! CSV summaries, the JAMA-style baseline table, and the plain-text method
//! comparison / selection files. Formatting is fixed-precision throughout
//! so byte-identical reruns stay byte-identical.

use std::io::Write;
use std::path::Path;

use crate::utils::stats_ext::StatsExt;

use super::super::balance::{self, BalanceTier};
use super::super::error::AnalysisError;
use super::super::models::{
    BalanceReport, Cohort, MatchedSample, MethodComparisonRow, SelectionRecord, StructuredSummary,
    SurvivalResult,
};
use super::super::registry::{self, SemanticType};

fn render_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::RenderFailure(e.to_string())
}

/// One-row CSV with the headline survival figures.
pub fn write_survival_summary_csv(
    path: &Path,
    survival: &SurvivalResult,
) -> Result<(), AnalysisError> {
    let mut writer = csv::Writer::from_path(path).map_err(render_err)?;
    writer
        .write_record([
            "analysis_type",
            "n_treatment",
            "n_control",
            "mortality_treatment",
            "mortality_control",
            "cox_hr",
            "cox_ci_lower",
            "cox_ci_upper",
            "cox_pvalue",
            "log_rank_pvalue",
            "concordance_index",
        ])
        .map_err(render_err)?;
    writer
        .write_record([
            "main".to_string(),
            survival.n_treatment.to_string(),
            survival.n_control.to_string(),
            format!("{:.6}", survival.mortality_rate_treatment),
            format!("{:.6}", survival.mortality_rate_control),
            format!("{:.6}", survival.hazard_ratio),
            format!("{:.6}", survival.ci95_lower),
            format!("{:.6}", survival.ci95_upper),
            format!("{:.6}", survival.p_value),
            format!("{:.6}", survival.log_rank_p),
            format!("{:.6}", survival.concordance_index),
        ])
        .map_err(render_err)?;
    writer.flush().map_err(render_err)?;
    Ok(())
}

/// Per-covariate balance assessment rows.
pub fn write_balance_csv(path: &Path, report: &BalanceReport) -> Result<(), AnalysisError> {
    let mut writer = csv::Writer::from_path(path).map_err(render_err)?;
    writer
        .write_record(["variable", "pre_smd", "post_smd", "balanced", "tier"])
        .map_err(render_err)?;
    for entry in &report.entries {
        writer
            .write_record([
                entry.covariate.clone(),
                format!("{:.6}", entry.smd_before),
                format!("{:.6}", entry.smd_after),
                entry.balanced.to_string(),
                BalanceTier::classify(entry.smd_after).as_str().to_string(),
            ])
            .map_err(render_err)?;
    }
    writer.flush().map_err(render_err)?;
    Ok(())
}

/// The matched rows with core fields, covariates, and any per-row extras
/// (IPTW weights, propensities, CATE estimates).
pub fn write_matched_data_csv(
    path: &Path,
    cohort: &Cohort,
    sample: &MatchedSample,
    covariates: &[String],
    cate_per_unit: Option<&[Option<f64>]>,
) -> Result<(), AnalysisError> {
    let mut writer = csv::Writer::from_path(path).map_err(render_err)?;

    let mut header = vec![
        "subject_id".to_string(),
        "hadm_id".to_string(),
        "stay_id".to_string(),
        "treatment_group".to_string(),
        "mortality".to_string(),
        "outcome_days".to_string(),
        "outcome_days_original".to_string(),
    ];
    header.extend(covariates.iter().cloned());
    if sample.propensity.is_some() {
        header.push("propensity_score".to_string());
    }
    if sample.weights.is_some() {
        header.push("iptw_weight".to_string());
    }
    if cate_per_unit.is_some() {
        header.push("cate_value".to_string());
    }
    writer.write_record(&header).map_err(render_err)?;

    fn fmt_opt(v: Option<i64>) -> String {
        v.map(|x| x.to_string()).unwrap_or_default()
    }
    fn fmt_val(v: f64) -> String {
        if v.is_nan() { String::new() } else { format!("{:.6}", v) }
    }

    for (pos, &row) in sample.indices.iter().enumerate() {
        let mut record = vec![
            cohort.subject_id[row].to_string(),
            fmt_opt(cohort.hadm_id[row]),
            fmt_opt(cohort.stay_id[row]),
            cohort.treatment[row].to_string(),
            cohort.mortality[row].to_string(),
            format!("{:.6}", cohort.outcome_days[row]),
            format!("{:.6}", cohort.outcome_days_original[row]),
        ];
        for name in covariates {
            let value = cohort
                .numeric_column(name)
                .map(|c| c.values[row])
                .unwrap_or(f64::NAN);
            record.push(fmt_val(value));
        }
        if let Some(propensity) = &sample.propensity {
            record.push(fmt_val(propensity[row]));
        }
        if let Some(weights) = &sample.weights {
            record.push(fmt_val(weights[pos]));
        }
        if let Some(cate) = cate_per_unit {
            record.push(cate[pos].map(fmt_val).unwrap_or_default());
        }
        writer.write_record(&record).map_err(render_err)?;
    }
    writer.flush().map_err(render_err)?;
    Ok(())
}

/// JAMA-style Table 1: before/after means, SDs, counts, and SMDs.
pub fn write_baseline_table_md(
    path: &Path,
    cohort: &Cohort,
    sample: &MatchedSample,
    covariates: &[String],
) -> Result<(), AnalysisError> {
    let mut out = String::new();

    let all_treated = cohort.treated_indices();
    let all_control = cohort.control_indices();
    let matched_treated: Vec<usize> = sample
        .indices
        .iter()
        .copied()
        .filter(|&i| cohort.treatment[i] == 1)
        .collect();
    let matched_control: Vec<usize> = sample
        .indices
        .iter()
        .copied()
        .filter(|&i| cohort.treatment[i] == 0)
        .collect();

    out.push_str("# Baseline Characteristics (Table 1)\n\n");
    out.push_str(&format!(
        "Before matching: treatment n={}, control n={}. After matching ({}): treatment n={}, control n={}.\n\n",
        all_treated.len(),
        all_control.len(),
        sample.method.label(),
        matched_treated.len(),
        matched_control.len()
    ));
    out.push_str("Continuous variables: mean (SD). Binary variables: n (%). SMD: standardized mean difference.\n\n");
    out.push_str("| Characteristic | Treatment (before) | Control (before) | SMD (before) | Treatment (after) | Control (after) | SMD (after) |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");

    for name in covariates {
        let Some(column) = cohort.numeric_column(name) else { continue };

        let cell = |rows: &[usize]| -> String {
            let values: Vec<f64> = rows.iter().map(|&i| column.values[i]).collect();
            match registry::type_of(name) {
                Some(SemanticType::Binary) => {
                    let n = values.iter().filter(|v| **v == 1.0).count();
                    let total = values.count_non_nan();
                    let pct = if total > 0 { n as f64 / total as f64 * 100.0 } else { 0.0 };
                    format!("{} ({:.1}%)", n, pct)
                },
                _ => {
                    let mean = values.mean_ignore_nan().unwrap_or(f64::NAN);
                    let sd = values.std_ignore_nan().unwrap_or(f64::NAN);
                    format!("{:.2} ({:.2})", mean, sd)
                },
            }
        };

        let smd_before = balance::smd_for(cohort, name, &all_treated, &all_control, None);
        let smd_after =
            balance::smd_for(cohort, name, &matched_treated, &matched_control, None);

        let display_name = registry::meta_of(name)
            .and_then(|m| m.unit)
            .map(|unit| format!("{} ({})", name, unit))
            .unwrap_or_else(|| name.clone());

        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {} | {} | {:.3} |\n",
            display_name,
            cell(&all_treated),
            cell(&all_control),
            smd_before,
            cell(&matched_treated),
            cell(&matched_control),
            smd_after
        ));
    }

    std::fs::write(path, out).map_err(render_err)
}

/// Human-readable comparison of the four methods.
pub fn write_method_comparison_txt(
    path: &Path,
    rows: &[MethodComparisonRow],
) -> Result<(), AnalysisError> {
    let mut out = String::new();
    out.push_str("Matching Method Comparison\n");
    out.push_str("==========================\n\n");
    out.push_str(&format!(
        "{:<14} {:>10} {:>12} {:>14} {:>12}\n",
        "method", "n_matched", "mean_smd", "balanced_pct", "degenerate"
    ));
    for row in rows {
        let mean_smd = if row.mean_smd.is_nan() {
            "N/A".to_string()
        } else {
            format!("{:.4}", row.mean_smd)
        };
        out.push_str(&format!(
            "{:<14} {:>10} {:>12} {:>13.1}% {:>12}\n",
            row.method_name,
            row.n_matched,
            mean_smd,
            row.balanced_pct * 100.0,
            row.degenerate
        ));
    }
    std::fs::write(path, out).map_err(render_err)
}

/// Selection verdict with the judge's (or fallback's) rationale.
pub fn write_selection_reasoning_txt(
    path: &Path,
    record: &SelectionRecord,
) -> Result<(), AnalysisError> {
    let mut out = String::new();
    out.push_str(&format!(
        "Selected Method: {}\n\n",
        record.selected_method.as_str().to_uppercase()
    ));
    out.push_str(&format!("Reasoning:\n{}\n\n", record.reasoning));
    out.push_str(&format!(
        "Numeric ranking: {}\n",
        record
            .numeric_ranking
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    ));
    if record.judge_divergence {
        out.push_str("Note: judge selection diverged from the numeric ranking.\n");
    }
    std::fs::write(path, out).map_err(render_err)
}

/// Structured summary artifact.
pub fn write_llm_summary_json(
    path: &Path,
    summary: &StructuredSummary,
) -> Result<(), AnalysisError> {
    let file = std::fs::File::create(path).map_err(render_err)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary).map_err(render_err)?;
    writer.write_all(b"\n").map_err(render_err)?;
    writer.flush().map_err(render_err)?;
    Ok(())
}
