//! Result summarizer scenario
//!
//! Turns the numeric survival findings into the structured question /
//! conclusion / PICO record. The deterministic template in
//! `analysis::summary` covers every case where this call fails.

use serde::Serialize;

use crate::services::analysis::models::{CohortSummary, StructuredSummary};

use super::super::client::LlmClient;
use super::super::models::{LlmError, LlmScenario};

const SYSTEM_PROMPT: &str = "You are a biostatistician expert. Summarize statistical analysis \
results in a structured format following clinical trial reporting standards. Respond with a \
JSON object of the exact form {\"question\": \"...\", \"conclusion\": \"...\", \
\"population\": {\"total_patients\": 0, \"treatment_n\": 0, \"control_n\": 0, \
\"description\": \"...\"}, \"intervention\": {\"treatment_group\": \"...\", \
\"control_group\": \"...\", \"primary_outcome\": \"...\"}, \"findings\": \
{\"cox_hazard_ratio\": 0.0, \"ci_95\": \"...\", \"p_value\": 0.0, \
\"absolute_risk_difference\": \"...\", \"hazard_change\": \"...\", \
\"significance\": \"...\"}}. State the conclusion in one sentence; when p >= 0.05 say that \
no significant difference in mortality was observed.";

/// Numeric findings of the main analysis, shipped to the summarizer
#[derive(Debug, Clone, Serialize)]
pub struct MainAnalysisFigures {
    pub matched_pairs: usize,
    pub hazard_ratio: f64,
    pub ci_95_lower: f64,
    pub ci_95_upper: f64,
    pub p_value: f64,
    pub mortality_treatment_pct: f64,
    pub mortality_control_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub trial_id: String,
    pub medication: String,
    pub cohort_summary: CohortSummary,
    pub main_analysis: MainAnalysisFigures,
}

/// Ask the summarizer for the structured summary.
pub fn summarize(
    client: &LlmClient,
    request: &SummaryRequest,
) -> Result<StructuredSummary, LlmError> {
    let user_prompt = serde_json::to_string_pretty(request)?;
    client.chat_completion(LlmScenario::ResultSummary, SYSTEM_PROMPT, &user_prompt)
}
