//! Workflow orchestrator
//!
//! Drives the full analysis as a linear stage machine:
//!
//! ```text
//! LOAD -> MATCH_ALL -> BALANCE_ALL -> SELECT -> BALANCE_FINAL ->
//!   RENDER_BALANCE -> SURVIVAL -> RENDER_SURVIVAL -> HETERO -> SUMMARY -> DONE
//! ```
//!
//! Stage failures become typed records; the heterogeneity, summary, and
//! render stages (and a survival fit failure) degrade the run while
//! everything else aborts it. The orchestrator itself never panics or
//! raises: callers always receive either the output or a fatal record,
//! both carrying the accumulated stage errors.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::config::AnalysisConfig;
use crate::services::llm::scenarios::summarizer::{self, SummaryRequest};
use crate::services::llm::LlmClient;

use super::balance;
use super::error::AnalysisError;
use super::forest;
use super::loader;
use super::matching;
use super::models::{
    BalanceReport, CateResult, CohortSummary, MethodComparisonRow, MethodOutcome,
    SelectionRecord, StructuredSummary, SurvivalResult,
};
use super::render;
use super::selection;
use super::summary;
use super::survival;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    MatchAll,
    BalanceAll,
    Select,
    BalanceFinal,
    RenderBalance,
    Survival,
    RenderSurvival,
    Hetero,
    Summary,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::MatchAll => "match_all",
            Self::BalanceAll => "balance_all",
            Self::Select => "select",
            Self::BalanceFinal => "balance_final",
            Self::RenderBalance => "render_balance",
            Self::Survival => "survival",
            Self::RenderSurvival => "render_survival",
            Self::Hetero => "hetero",
            Self::Summary => "summary",
            Self::Done => "done",
        }
    }

    fn progress_message(&self) -> &'static str {
        match self {
            Self::Load => "Loading cohort data...",
            Self::MatchAll => {
                "Running 4 matching algorithms (PSM, PSM+caliper, Mahalanobis, IPTW)..."
            },
            Self::BalanceAll => "Extracting balance diagnostics for each method...",
            Self::Select => "Comparing methods and selecting the best one...",
            Self::BalanceFinal => "Assessing covariate balance for the selected method...",
            Self::RenderBalance => "Generating baseline table and balance plots...",
            Self::Survival => "Analyzing survival outcomes (Kaplan-Meier + Cox regression)...",
            Self::RenderSurvival => "Rendering cumulative mortality curve...",
            Self::Hetero => "Running causal forest: estimating treatment effect heterogeneity...",
            Self::Summary => "Generating executive summary...",
            Self::Done => "Analysis complete.",
        }
    }
}

/// One recorded stage failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub kind: String,
    pub message: String,
}

impl StageError {
    fn new(stage: Stage, error: &AnalysisError) -> Self {
        Self {
            stage: stage.as_str().to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Everything a completed (possibly degraded) run produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub cohort_summary: CohortSummary,
    pub covariates: Vec<String>,
    pub method_comparisons: Vec<MethodComparisonRow>,
    pub selection: Option<SelectionRecord>,
    pub balance: Option<BalanceReport>,
    pub survival: Option<SurvivalResult>,
    pub heterogeneity: Option<CateResult>,
    pub summary: Option<StructuredSummary>,
    pub stage_errors: Vec<StageError>,
    /// Artifact file names written into the output directory
    pub artifacts: Vec<String>,
}

/// A run that hit a fatal stage
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: AnalysisError,
    pub stage_errors: Vec<StageError>,
}

/// Progress sink: advisory, side-effect isolated, never on the critical path
pub type ProgressCallback = dyn Fn(&str) + Send + Sync;

/// Inputs of one pipeline run
pub struct RunContext<'a> {
    pub trial_id: &'a str,
    pub medication: &'a str,
    pub cohort_path: &'a Path,
    pub output_dir: &'a Path,
    pub config: &'a AnalysisConfig,
    pub llm: Option<&'a LlmClient>,
    pub progress: Option<&'a ProgressCallback>,
}

impl RunContext<'_> {
    fn report(&self, stage: Stage) {
        tracing::info!("[{}] {}", stage.as_str(), stage.progress_message());
        if let Some(callback) = self.progress {
            // a panicking callback must not take the run down with it
            let message = stage.progress_message();
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                tracing::warn!("Progress callback panicked; continuing");
            }
        }
    }
}

/// Execute the full workflow.
pub fn run(ctx: &RunContext<'_>) -> Result<PipelineOutput, PipelineFailure> {
    let mut stage_errors: Vec<StageError> = Vec::new();

    let fatal = |stage: Stage, error: AnalysisError, stage_errors: &[StageError]| {
        let mut errors = stage_errors.to_vec();
        errors.push(StageError::new(stage, &error));
        PipelineFailure { stage, error, stage_errors: errors }
    };

    // LOAD
    ctx.report(Stage::Load);
    let cohort = loader::load(ctx.cohort_path, ctx.config)
        .map_err(|e| fatal(Stage::Load, e, &stage_errors))?;
    let covariates = loader::select_covariates(&cohort, ctx.config.missingness_threshold);
    tracing::info!("Selected {} covariates for matching", covariates.len());

    // MATCH_ALL
    ctx.report(Stage::MatchAll);
    let match_results = matching::run_all(&cohort, &covariates, ctx.config);
    let mut samples = Vec::new();
    for (method, result) in match_results {
        match result {
            Ok(sample) => {
                if sample.degenerate {
                    stage_errors.push(StageError::new(
                        Stage::MatchAll,
                        &AnalysisError::DegenerateMatch {
                            method: method.as_str().to_string(),
                            detail: format!(
                                "n_matched={}, effective_sample={:.1}",
                                sample.n_matched(),
                                sample.effective_sample_size()
                            ),
                        },
                    ));
                }
                samples.push(sample);
            },
            Err(e) => {
                tracing::warn!("{} failed: {}", method, e);
                stage_errors.push(StageError::new(Stage::MatchAll, &e));
            },
        }
    }
    if samples.is_empty() {
        return Err(fatal(
            Stage::MatchAll,
            AnalysisError::ModelFitFailure("all four matching methods failed".into()),
            &stage_errors,
        ));
    }

    // BALANCE_ALL
    ctx.report(Stage::BalanceAll);
    let outcomes: Vec<MethodOutcome> = samples
        .into_iter()
        .map(|sample| {
            let report = balance::balance_report(
                &cohort,
                &sample,
                &covariates,
                ctx.config.smd_balanced_threshold,
            );
            tracing::info!(
                "{}: mean_smd={:.4}, balanced={:.0}%, n_matched={}",
                sample.method,
                report.mean_abs_smd,
                report.pct_balanced * 100.0,
                sample.n_matched()
            );
            MethodOutcome { sample, balance: report }
        })
        .collect();
    let method_comparisons: Vec<MethodComparisonRow> =
        outcomes.iter().map(|o| o.comparison_row()).collect();

    // SELECT
    ctx.report(Stage::Select);
    let selection_record = selection::select(&outcomes, ctx.llm);
    if ctx.llm.is_some() && !selection_record.judge_used {
        stage_errors.push(StageError::new(
            Stage::Select,
            &AnalysisError::ExternalServiceFailure(
                "method judge unavailable; numeric ranking applied".into(),
            ),
        ));
    }
    tracing::info!(
        "Selected method: {} ({})",
        selection_record.selected_method,
        if selection_record.judge_used { "judge" } else { "fallback" }
    );
    let selected = outcomes
        .iter()
        .find(|o| o.sample.method == selection_record.selected_method)
        .expect("selected method is always present in outcomes")
        .clone();

    // BALANCE_FINAL
    ctx.report(Stage::BalanceFinal);
    let final_balance = balance::balance_report(
        &cohort,
        &selected.sample,
        &covariates,
        ctx.config.smd_balanced_threshold,
    );
    tracing::info!(
        "Final balance: {}/{} covariates balanced",
        final_balance.entries.iter().filter(|e| e.balanced).count(),
        final_balance.entries.len()
    );

    let mut artifacts: Vec<String> = Vec::new();

    // RENDER_BALANCE (non-fatal)
    ctx.report(Stage::RenderBalance);
    match render::render_balance_artifacts(
        ctx.output_dir,
        &cohort,
        &selected.sample,
        &covariates,
        &final_balance,
        &method_comparisons,
        &selection_record,
        None,
    ) {
        Ok(written) => artifacts.extend(file_names(&written)),
        Err(e) => {
            tracing::warn!("Balance rendering failed: {}", e);
            stage_errors.push(StageError::new(Stage::RenderBalance, &e));
        },
    }

    // SURVIVAL (fit failure degrades the run)
    ctx.report(Stage::Survival);
    let survival_result = match survival::analyze(&cohort, &selected.sample, ctx.config) {
        Ok(result) => {
            tracing::info!(
                "HR: {:.3} (95% CI: {:.3}-{:.3}, p={:.4})",
                result.hazard_ratio,
                result.ci95_lower,
                result.ci95_upper,
                result.p_value
            );
            Some(result)
        },
        Err(e) => {
            tracing::warn!("Survival model failed: {}", e);
            stage_errors.push(StageError::new(Stage::Survival, &e));
            None
        },
    };

    // RENDER_SURVIVAL (non-fatal)
    if let Some(result) = &survival_result {
        ctx.report(Stage::RenderSurvival);
        match render::render_survival_artifacts(
            ctx.output_dir,
            &cohort,
            &selected.sample,
            result,
            ctx.config.follow_up_days,
        ) {
            Ok(written) => artifacts.extend(file_names(&written)),
            Err(e) => {
                tracing::warn!("Survival rendering failed: {}", e);
                stage_errors.push(StageError::new(Stage::RenderSurvival, &e));
            },
        }
    }

    // HETERO (non-fatal)
    ctx.report(Stage::Hetero);
    let heterogeneity = match forest::estimate(
        &cohort,
        &selected.sample,
        &covariates,
        &ctx.config.causal_forest,
    ) {
        Ok(result) => {
            tracing::info!(
                "ATE: {:.3}, CATE range: [{:.3}, {:.3}], positive rate: {:.1}%",
                result.ate,
                result.cate_stats.min,
                result.cate_stats.max,
                result.cate_stats.positive_rate * 100.0
            );
            // second render pass: matched rows now carry CATE estimates
            let path = ctx.output_dir.join(render::matched_data_filename(selected.sample.method));
            if let Err(e) = render::tables::write_matched_data_csv(
                &path,
                &cohort,
                &selected.sample,
                &covariates,
                Some(&result.cate_per_unit),
            ) {
                tracing::warn!("Re-rendering matched data with CATE failed: {}", e);
                stage_errors.push(StageError::new(Stage::Hetero, &e));
            }
            Some(result)
        },
        Err(e) => {
            tracing::warn!("Causal forest failed: {}", e);
            stage_errors.push(StageError::new(Stage::Hetero, &e));
            None
        },
    };

    // SUMMARY (non-fatal; requires survival figures)
    ctx.report(Stage::Summary);
    let structured_summary = survival_result.as_ref().map(|result| {
        let cohort_summary = cohort.summary();
        let figures = summary::main_analysis_figures(result);
        let from_llm = ctx.llm.and_then(|client| {
            let request = SummaryRequest {
                trial_id: ctx.trial_id.to_string(),
                medication: ctx.medication.to_string(),
                cohort_summary: cohort_summary.clone(),
                main_analysis: figures.clone(),
            };
            match summarizer::summarize(client, &request) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!("LLM summarizer unavailable: {}", e);
                    stage_errors.push(StageError::new(
                        Stage::Summary,
                        &AnalysisError::ExternalServiceFailure(e.to_string()),
                    ));
                    None
                },
            }
        });
        from_llm
            .unwrap_or_else(|| summary::template_summary(ctx.medication, &cohort_summary, &figures))
    });
    if let Some(summary) = &structured_summary {
        match render::render_summary_artifact(ctx.output_dir, summary) {
            Ok(path) => artifacts.extend(file_names(std::slice::from_ref(&path))),
            Err(e) => {
                tracing::warn!("Summary rendering failed: {}", e);
                stage_errors.push(StageError::new(Stage::Summary, &e));
            },
        }
    } else {
        tracing::info!("Skipping structured summary (no survival result)");
    }

    ctx.report(Stage::Done);

    Ok(PipelineOutput {
        cohort_summary: cohort.summary(),
        covariates,
        method_comparisons,
        selection: Some(selection_record),
        balance: Some(final_balance),
        survival: survival_result,
        heterogeneity,
        summary: structured_summary,
        stage_errors,
        artifacts,
    })
}

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}
