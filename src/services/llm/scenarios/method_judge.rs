//! Method selection scenario
//!
//! Sends the scored method-comparison table plus the per-method balance
//! snapshots to the judge and expects a single method name with a free-text
//! rationale. The caller treats any failure as a signal to fall back to the
//! deterministic numeric ranking.

use serde::{Deserialize, Serialize};

use crate::services::analysis::models::{BalanceEntry, MethodComparisonRow};

use super::super::client::LlmClient;
use super::super::models::{LlmError, LlmScenario};

const SYSTEM_PROMPT: &str = "You are a biostatistician reviewing covariate balance after \
propensity-score analysis of an observational ICU cohort. You will receive a comparison of \
four matching/weighting methods (psm, psm_caliper, mahalanobis, iptw): per-method mean \
absolute standardized mean difference, the share of balanced covariates, the matched sample \
size, and per-covariate SMDs before and after adjustment. Select the single method giving \
the most credible treatment-effect estimate, weighing balance first and retained sample \
size second. Respond with a JSON object of the exact form \
{\"selected_method\": \"psm|psm_caliper|mahalanobis|iptw\", \"reasoning\": \"...\"}.";

/// Balance snapshot for one method, shipped to the judge
#[derive(Debug, Clone, Serialize)]
pub struct MethodBalanceSnapshot {
    pub method: MethodComparisonRow,
    pub covariate_balance: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodJudgeRequest {
    /// Methods ordered by the independent numeric ranking, best first
    pub numeric_ranking: Vec<String>,
    pub methods: Vec<MethodBalanceSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodJudgeResponse {
    pub selected_method: String,
    pub reasoning: String,
}

/// Ask the judge to pick a method.
pub fn judge(
    client: &LlmClient,
    request: &MethodJudgeRequest,
) -> Result<MethodJudgeResponse, LlmError> {
    let user_prompt = serde_json::to_string_pretty(request)?;
    client.chat_completion(LlmScenario::MethodSelection, SYSTEM_PROMPT, &user_prompt)
}
