//! Analysis data models
//!
//! Structured records flowing between the pipeline stages: the loaded
//! cohort, matched samples, balance reports, survival and heterogeneous
//! effect results, and the structured summary handed back to callers.

use serde::{Deserialize, Serialize};

// ============================================================================
// Cohort
// ============================================================================

/// A numeric covariate column; missing values are stored as NaN.
#[derive(Debug, Clone)]
pub struct NumericColumn {
    pub name: String,
    pub values: Vec<f64>,
    /// Every observed value was a whole number (drives the imputation
    /// fallback for columns absent from the registry)
    pub integer_like: bool,
}

impl NumericColumn {
    pub fn missing_rate(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let missing = self.values.iter().filter(|v| v.is_nan()).count();
        missing as f64 / self.values.len() as f64
    }
}

/// A categorical covariate column kept as raw strings (used for balance
/// reporting and the baseline table; never enters the propensity model).
#[derive(Debug, Clone)]
pub struct CategoricalColumn {
    pub name: String,
    pub values: Vec<Option<String>>,
}

impl CategoricalColumn {
    /// Distinct observed levels, sorted for stable iteration.
    pub fn levels(&self) -> Vec<String> {
        let mut levels: Vec<String> = self
            .values
            .iter()
            .flatten()
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        levels.sort_unstable();
        levels
    }
}

/// Column-oriented cohort: one entry per ICU stay.
///
/// Immutable once loaded; matching methods refer to rows by index.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub n: usize,
    pub subject_id: Vec<i64>,
    pub hadm_id: Vec<Option<i64>>,
    pub stay_id: Vec<Option<i64>>,
    /// 1 = treated, 0 = control
    pub treatment: Vec<u8>,
    /// 1 = death, 0 = censored
    pub mortality: Vec<u8>,
    /// Time to event or censoring, capped at the follow-up horizon
    pub outcome_days: Vec<f64>,
    /// Pre-cap values kept for audit
    pub outcome_days_original: Vec<f64>,
    /// Numeric columns in CSV order
    pub numeric: Vec<NumericColumn>,
    /// Registered categorical columns in CSV order
    pub categorical: Vec<CategoricalColumn>,
}

impl Cohort {
    pub fn numeric_column(&self, name: &str) -> Option<&NumericColumn> {
        self.numeric.iter().find(|c| c.name == name)
    }

    pub fn categorical_column(&self, name: &str) -> Option<&CategoricalColumn> {
        self.categorical.iter().find(|c| c.name == name)
    }

    pub fn treated_indices(&self) -> Vec<usize> {
        (0..self.n).filter(|&i| self.treatment[i] == 1).collect()
    }

    pub fn control_indices(&self) -> Vec<usize> {
        (0..self.n).filter(|&i| self.treatment[i] == 0).collect()
    }

    pub fn n_treated(&self) -> usize {
        self.treatment.iter().filter(|&&t| t == 1).count()
    }

    pub fn n_control(&self) -> usize {
        self.n - self.n_treated()
    }

    pub fn summary(&self) -> CohortSummary {
        let treatment_n = self.n_treated();
        let control_n = self.n_control();
        let treatment_pct = if self.n > 0 {
            treatment_n as f64 / self.n as f64 * 100.0
        } else {
            0.0
        };
        CohortSummary { total_patients: self.n, treatment_n, control_n, treatment_pct }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSummary {
    pub total_patients: usize,
    pub treatment_n: usize,
    pub control_n: usize,
    pub treatment_pct: f64,
}

// ============================================================================
// Matching
// ============================================================================

/// The four matching/weighting algorithms, dispatched as tagged variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Psm,
    PsmCaliper,
    Mahalanobis,
    Iptw,
}

impl MatchMethod {
    pub const ALL: [MatchMethod; 4] =
        [Self::Psm, Self::PsmCaliper, Self::Mahalanobis, Self::Iptw];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Psm => "psm",
            Self::PsmCaliper => "psm_caliper",
            Self::Mahalanobis => "mahalanobis",
            Self::Iptw => "iptw",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Psm => "PSM (no caliper)",
            Self::PsmCaliper => "PSM with caliper",
            Self::Mahalanobis => "Mahalanobis NN",
            Self::Iptw => "IPTW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "psm" => Some(Self::Psm),
            "psm_caliper" => Some(Self::PsmCaliper),
            "mahalanobis" => Some(Self::Mahalanobis),
            "iptw" => Some(Self::Iptw),
            _ => None,
        }
    }

    pub fn is_weighting(&self) -> bool {
        matches!(self, Self::Iptw)
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying one matching/weighting method to a cohort.
///
/// For pair methods `indices` holds treated rows followed by their matched
/// controls and `pairs` links them 1:1; for IPTW `indices` covers every row
/// and `weights` carries the inverse-probability weights.
#[derive(Debug, Clone)]
pub struct MatchedSample {
    pub method: MatchMethod,
    /// Cohort row indices included in the sample
    pub indices: Vec<usize>,
    /// (treated_row, control_row) pairs for 1:1 methods
    pub pairs: Option<Vec<(usize, usize)>>,
    /// Per-sample weights aligned with `indices` (IPTW only)
    pub weights: Option<Vec<f64>>,
    /// Learned propensity scores aligned with the full cohort, kept for
    /// diagnostics (absent for Mahalanobis)
    pub propensity: Option<Vec<f64>>,
    /// Fewer than 10 pairs, or effective sample size below 20 for IPTW
    pub degenerate: bool,
}

impl MatchedSample {
    pub fn n_treated(&self, cohort: &Cohort) -> usize {
        self.indices.iter().filter(|&&i| cohort.treatment[i] == 1).count()
    }

    pub fn n_control(&self, cohort: &Cohort) -> usize {
        self.indices.iter().filter(|&&i| cohort.treatment[i] == 0).count()
    }

    /// Matched pairs for 1:1 methods; total weighted rows for IPTW.
    pub fn n_matched(&self) -> usize {
        match &self.pairs {
            Some(pairs) => pairs.len(),
            None => self.indices.len(),
        }
    }

    /// Kish effective sample size for weighted samples; plain count otherwise.
    pub fn effective_sample_size(&self) -> f64 {
        match &self.weights {
            Some(weights) => {
                let sum: f64 = weights.iter().sum();
                let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
                if sum_sq > 0.0 { sum * sum / sum_sq } else { 0.0 }
            },
            None => self.indices.len() as f64,
        }
    }
}

// ============================================================================
// Balance
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub covariate: String,
    pub smd_before: f64,
    pub smd_after: f64,
    pub balanced: bool,
}

/// Before/after covariate balance for one matched sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReport {
    pub entries: Vec<BalanceEntry>,
    /// Mean of |smd_after| across covariates
    pub mean_abs_smd: f64,
    /// Share of covariates with |smd_after| below the balance threshold
    pub pct_balanced: f64,
}

impl BalanceReport {
    pub fn n_improved(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.smd_after.abs() < e.smd_before.abs())
            .count()
    }
}

/// One method's matched sample with its balance report, as produced by the
/// MATCH_ALL / BALANCE_ALL stages.
#[derive(Debug, Clone)]
pub struct MethodOutcome {
    pub sample: MatchedSample,
    pub balance: BalanceReport,
}

impl MethodOutcome {
    pub fn comparison_row(&self) -> MethodComparisonRow {
        MethodComparisonRow {
            method_name: self.sample.method.as_str().to_string(),
            n_matched: self.sample.n_matched(),
            mean_smd: self.balance.mean_abs_smd,
            balanced_pct: self.balance.pct_balanced,
            degenerate: self.sample.degenerate,
        }
    }
}

/// Per-method entry in the comparison table handed to the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodComparisonRow {
    pub method_name: String,
    pub n_matched: usize,
    pub mean_smd: f64,
    pub balanced_pct: f64,
    pub degenerate: bool,
}

/// Outcome of the method-selection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub selected_method: MatchMethod,
    pub reasoning: String,
    /// Methods in numeric rank order (best first), computed independently
    /// of the judge
    pub numeric_ranking: Vec<MatchMethod>,
    /// The judge picked a method more than one rank step below the numeric
    /// leader
    pub judge_divergence: bool,
    /// False when the deterministic fallback decided
    pub judge_used: bool,
}

// ============================================================================
// Survival
// ============================================================================

/// One step of a cumulative-mortality curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalPoint {
    pub day: f64,
    pub cumulative_mortality: f64,
    /// Weighted count still at risk just before `day`
    pub at_risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalResult {
    pub hazard_ratio: f64,
    pub ci95_lower: f64,
    pub ci95_upper: f64,
    pub p_value: f64,
    pub log_rank_p: f64,
    pub n_treatment: usize,
    pub n_control: usize,
    pub mortality_rate_treatment: f64,
    pub mortality_rate_control: f64,
    pub concordance_index: f64,
    pub cumulative_mortality_treatment: Vec<SurvivalPoint>,
    pub cumulative_mortality_control: Vec<SurvivalPoint>,
}

// ============================================================================
// Heterogeneous effects
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CateStats {
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub max: f64,
    /// Share of units with CATE > 0
    pub positive_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CateResult {
    pub ate: f64,
    /// Aligned to the matched sample's row order; None marks rows dropped
    /// for incomplete effect-modifier values
    pub cate_per_unit: Vec<Option<f64>>,
    pub cate_stats: CateStats,
    /// (covariate, importance) pairs, non-negative and summing to 1,
    /// sorted by descending importance
    pub feature_importances: Vec<(String, f64)>,
}

// ============================================================================
// Structured summary
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSummary {
    pub total_patients: usize,
    pub treatment_n: usize,
    pub control_n: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionSummary {
    pub treatment_group: String,
    pub control_group: String,
    pub primary_outcome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub cox_hazard_ratio: f64,
    pub ci_95: String,
    pub p_value: f64,
    pub absolute_risk_difference: String,
    pub hazard_change: String,
    pub significance: String,
}

/// Question / Conclusion / PICO summary of a completed analysis, either
/// written by the LLM summarizer or rendered from the template fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub question: String,
    pub conclusion: String,
    pub population: PopulationSummary,
    pub intervention: InterventionSummary,
    pub findings: FindingsSummary,
}
