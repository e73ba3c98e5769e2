//! Structured summary fallback
//!
//! Template-rendered question/conclusion/PICO summary built from the same
//! numeric inputs the LLM summarizer receives. Used whenever the summarizer
//! is disabled, unreachable, or returns something unparseable.

use crate::services::llm::scenarios::summarizer::MainAnalysisFigures;

use super::models::{
    CohortSummary, FindingsSummary, InterventionSummary, PopulationSummary, StructuredSummary,
    SurvivalResult,
};

/// Numeric figures of the main analysis, derived from the survival result.
pub fn main_analysis_figures(survival: &SurvivalResult) -> MainAnalysisFigures {
    MainAnalysisFigures {
        matched_pairs: survival.n_treatment,
        hazard_ratio: survival.hazard_ratio,
        ci_95_lower: survival.ci95_lower,
        ci_95_upper: survival.ci95_upper,
        p_value: survival.p_value,
        mortality_treatment_pct: survival.mortality_rate_treatment * 100.0,
        mortality_control_pct: survival.mortality_rate_control * 100.0,
    }
}

/// Render the template summary from the cohort counts and survival figures.
pub fn template_summary(
    medication: &str,
    cohort: &CohortSummary,
    figures: &MainAnalysisFigures,
) -> StructuredSummary {
    let hr = figures.hazard_ratio;
    let p_value = figures.p_value;
    let abs_diff = figures.mortality_treatment_pct - figures.mortality_control_pct;

    let is_significant = p_value < 0.05;
    let significance = if is_significant {
        "statistically significant"
    } else {
        "Not statistically significant"
    };

    let conclusion = if is_significant {
        if hr > 1.0 {
            format!(
                "Significant increase in mortality was observed with {} (p={:.4}).",
                medication, p_value
            )
        } else {
            format!(
                "Significant decrease in mortality was observed with {} (p={:.4}).",
                medication, p_value
            )
        }
    } else {
        format!(
            "No significant difference in mortality was observed between treatment and control groups (p={:.4}).",
            p_value
        )
    };

    StructuredSummary {
        question: format!(
            "What is the effect of {} on 28-day mortality in septic shock patients?",
            medication
        ),
        conclusion,
        population: PopulationSummary {
            total_patients: cohort.total_patients,
            treatment_n: cohort.treatment_n,
            control_n: cohort.control_n,
            description: "Adults with septic shock requiring vasopressors".to_string(),
        },
        intervention: InterventionSummary {
            treatment_group: format!("Received {}", medication),
            control_group: "Standard care".to_string(),
            primary_outcome: "28-day all-cause mortality".to_string(),
        },
        findings: FindingsSummary {
            cox_hazard_ratio: hr,
            ci_95: format!("{:.3} - {:.3}", figures.ci_95_lower, figures.ci_95_upper),
            p_value,
            absolute_risk_difference: format!("{:+.1} percentage points", abs_diff),
            hazard_change: format!("{:+.1}%", (hr - 1.0) * 100.0),
            significance: significance.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figures(hr: f64, p: f64) -> MainAnalysisFigures {
        MainAnalysisFigures {
            matched_pairs: 200,
            hazard_ratio: hr,
            ci_95_lower: hr * 0.85,
            ci_95_upper: hr * 1.18,
            p_value: p,
            mortality_treatment_pct: 31.2,
            mortality_control_pct: 29.1,
        }
    }

    fn cohort() -> CohortSummary {
        CohortSummary {
            total_patients: 12345,
            treatment_n: 623,
            control_n: 11722,
            treatment_pct: 5.05,
        }
    }

    #[test]
    fn null_result_reads_as_no_difference() {
        let summary = template_summary("hydrocortisone", &cohort(), &figures(1.04, 0.5971));
        assert!(summary.conclusion.starts_with("No significant difference"));
        assert!(summary.conclusion.contains("0.5971"));
        assert_eq!(summary.findings.significance, "Not statistically significant");
        assert_eq!(summary.findings.hazard_change, "+4.0%");
        assert_eq!(summary.findings.absolute_risk_difference, "+2.1 percentage points");
    }

    #[test]
    fn protective_effect_reads_as_decrease() {
        let summary = template_summary("hydrocortisone", &cohort(), &figures(0.72, 0.0031));
        assert!(summary.conclusion.contains("Significant decrease"));
        assert_eq!(summary.findings.significance, "statistically significant");
        assert!(summary.findings.hazard_change.starts_with('-'));
    }

    #[test]
    fn harmful_effect_reads_as_increase() {
        let summary = template_summary("dopamine", &cohort(), &figures(1.45, 0.0104));
        assert!(summary.conclusion.contains("Significant increase"));
        assert!(summary.question.contains("dopamine"));
    }

    #[test]
    fn population_echoes_cohort_counts() {
        let summary = template_summary("hydrocortisone", &cohort(), &figures(1.0, 1.0));
        assert_eq!(summary.population.total_patients, 12345);
        assert_eq!(summary.population.treatment_n, 623);
        assert_eq!(summary.population.control_n, 11722);
    }
}
