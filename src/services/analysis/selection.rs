//! Method selector
//!
//! Ranks the four methods numerically (mean |SMD| first, share of balanced
//! covariates second, retained sample size third) and asks the LLM judge
//! for a tie-break rationale. The numeric ranking is always computed and
//! recorded; the judge may override it, but an unreachable or incoherent
//! judge silently yields to the deterministic top rank.

use crate::services::llm::scenarios::method_judge::{
    self, MethodBalanceSnapshot, MethodJudgeRequest,
};
use crate::services::llm::LlmClient;

use super::models::{MatchMethod, MethodOutcome, SelectionRecord};

pub const FALLBACK_REASONING: &str = "LLM unavailable; deterministic fallback";

/// Numeric ranking over the available methods, best first.
///
/// Primary key: mean absolute SMD after adjustment (lower wins, NaN last).
/// Tie-breakers: pct balanced (higher wins), then n_matched (higher wins),
/// then the fixed method order for full determinism.
pub fn rank_methods(outcomes: &[MethodOutcome]) -> Vec<MatchMethod> {
    let mut order: Vec<&MethodOutcome> = outcomes.iter().collect();
    order.sort_by(|a, b| {
        let smd_a = a.balance.mean_abs_smd;
        let smd_b = b.balance.mean_abs_smd;
        match (smd_a.is_nan(), smd_b.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => smd_a.partial_cmp(&smd_b).unwrap(),
        }
        .then_with(|| b.balance.pct_balanced.partial_cmp(&a.balance.pct_balanced).unwrap())
        .then_with(|| b.sample.n_matched().cmp(&a.sample.n_matched()))
        .then_with(|| method_position(a.sample.method).cmp(&method_position(b.sample.method)))
    });
    order.iter().map(|o| o.sample.method).collect()
}

fn method_position(method: MatchMethod) -> usize {
    MatchMethod::ALL.iter().position(|&m| m == method).unwrap_or(usize::MAX)
}

/// Select the best method, preferring the judge's verdict when available.
pub fn select(outcomes: &[MethodOutcome], client: Option<&LlmClient>) -> SelectionRecord {
    let numeric_ranking = rank_methods(outcomes);
    let numeric_best = numeric_ranking[0];

    let judged = client.and_then(|client| {
        let request = MethodJudgeRequest {
            numeric_ranking: numeric_ranking.iter().map(|m| m.as_str().to_string()).collect(),
            methods: outcomes
                .iter()
                .map(|o| MethodBalanceSnapshot {
                    method: o.comparison_row(),
                    covariate_balance: o.balance.entries.clone(),
                })
                .collect(),
        };
        match method_judge::judge(client, &request) {
            Ok(response) => match MatchMethod::parse(&response.selected_method) {
                Some(method) if outcomes.iter().any(|o| o.sample.method == method) => {
                    Some((method, response.reasoning))
                },
                Some(method) => {
                    tracing::warn!(
                        "Judge chose '{}' which produced no usable sample; falling back",
                        method
                    );
                    None
                },
                None => {
                    tracing::warn!(
                        "Judge returned unrecognized method '{}'; falling back",
                        response.selected_method
                    );
                    None
                },
            },
            Err(e) => {
                tracing::warn!("Method judge unavailable: {}", e);
                None
            },
        }
    });

    match judged {
        Some((method, reasoning)) => {
            let rank = numeric_ranking.iter().position(|&m| m == method).unwrap_or(0);
            let judge_divergence = rank > 1;
            if judge_divergence {
                tracing::warn!(
                    "Judge selected {} (numeric rank {}), diverging from numeric leader {}",
                    method,
                    rank + 1,
                    numeric_best
                );
            }
            SelectionRecord {
                selected_method: method,
                reasoning,
                numeric_ranking,
                judge_divergence,
                judge_used: true,
            }
        },
        None => SelectionRecord {
            selected_method: numeric_best,
            reasoning: FALLBACK_REASONING.to_string(),
            numeric_ranking,
            judge_divergence: false,
            judge_used: false,
        },
    }
}
