//! Artifact renderer
//!
//! Writes the fixed-name artifact set into the run's output directory.
//! Downstream readers (report builders, the front-end) locate artifacts by
//! these names, so they are constants here and nowhere else.

pub mod plots;
pub mod tables;

use std::path::{Path, PathBuf};

use super::error::AnalysisError;
use super::models::{
    BalanceReport, Cohort, MatchMethod, MatchedSample, MethodComparisonRow, SelectionRecord,
    StructuredSummary, SurvivalResult,
};
use super::survival::at_risk_at;

pub const BASELINE_TABLE_FILE: &str = "baseline_table_main_JAMA.md";
pub const SMD_PLOT_FILE: &str = "main_analysis_smd_plot.png";
pub const MORTALITY_PLOT_FILE: &str = "main_analysis_cumulative_mortality.png";
pub const SURVIVAL_SUMMARY_FILE: &str = "main_survival_summary.csv";
pub const BALANCE_CSV_FILE: &str = "balance_assessment_main.csv";
pub const METHOD_COMPARISON_FILE: &str = "method_comparison_summary.txt";
pub const SELECTION_REASONING_FILE: &str = "method_selection_reasoning.txt";
pub const LLM_SUMMARY_FILE: &str = "llm_summary.json";

/// Days shown in the number-at-risk table.
pub const RISK_TABLE_DAYS: [f64; 7] = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 28.0];

pub fn matched_data_filename(method: MatchMethod) -> String {
    format!("matched_data_main_{}.csv", method.as_str())
}

/// Balance-stage artifacts: baseline table, love plot, balance CSV,
/// matched rows, and the method comparison/selection text files.
#[allow(clippy::too_many_arguments)]
pub fn render_balance_artifacts(
    output_dir: &Path,
    cohort: &Cohort,
    sample: &MatchedSample,
    covariates: &[String],
    balance: &BalanceReport,
    comparison: &[MethodComparisonRow],
    selection: &SelectionRecord,
    cate_per_unit: Option<&[Option<f64>]>,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut written = Vec::new();

    let path = output_dir.join(BASELINE_TABLE_FILE);
    tables::write_baseline_table_md(&path, cohort, sample, covariates)?;
    written.push(path);

    let path = output_dir.join(BALANCE_CSV_FILE);
    tables::write_balance_csv(&path, balance)?;
    written.push(path);

    let path = output_dir.join(SMD_PLOT_FILE);
    plots::love_plot(&path, balance)?;
    written.push(path);

    let path = output_dir.join(matched_data_filename(sample.method));
    tables::write_matched_data_csv(&path, cohort, sample, covariates, cate_per_unit)?;
    written.push(path);

    let path = output_dir.join(METHOD_COMPARISON_FILE);
    tables::write_method_comparison_txt(&path, comparison)?;
    written.push(path);

    let path = output_dir.join(SELECTION_REASONING_FILE);
    tables::write_selection_reasoning_txt(&path, selection)?;
    written.push(path);

    Ok(written)
}

/// Survival-stage artifacts: the one-row summary CSV and the cumulative
/// mortality curve with its risk table.
pub fn render_survival_artifacts(
    output_dir: &Path,
    cohort: &Cohort,
    sample: &MatchedSample,
    survival: &SurvivalResult,
    follow_up_days: f64,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut written = Vec::new();

    let path = output_dir.join(SURVIVAL_SUMMARY_FILE);
    tables::write_survival_summary_csv(&path, survival)?;
    written.push(path);

    let days: Vec<f64> = RISK_TABLE_DAYS
        .iter()
        .copied()
        .filter(|d| *d <= follow_up_days)
        .collect();
    let risk = plots::RiskTable {
        treatment: days.iter().map(|&d| at_risk_at(cohort, sample, true, d)).collect(),
        control: days.iter().map(|&d| at_risk_at(cohort, sample, false, d)).collect(),
        days,
    };

    let path = output_dir.join(MORTALITY_PLOT_FILE);
    plots::mortality_plot(&path, survival, &risk, follow_up_days)?;
    written.push(path);

    Ok(written)
}

/// Structured-summary artifact.
pub fn render_summary_artifact(
    output_dir: &Path,
    summary: &StructuredSummary,
) -> Result<PathBuf, AnalysisError> {
    let path = output_dir.join(LLM_SUMMARY_FILE);
    tables::write_llm_summary_json(&path, summary)?;
    Ok(path)
}
