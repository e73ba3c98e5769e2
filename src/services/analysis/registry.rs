//! Covariate type registry
//!
//! Single source of truth mapping every baseline variable to its semantic
//! type, unit, and description. The cohort loader, balance diagnostics, and
//! matching engine all consult this table; declaring a covariate list
//! anywhere else is a bug waiting to drift out of sync.
//!
//! The registry also owns the post-treatment exclusion set. Keeping outcome
//! and post-treatment columns out of the propensity model is the central
//! leakage guard of the pipeline, so the set lives next to the type table
//! and has its own tests.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Semantic type of a baseline covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Continuous,
    Binary,
    Ordinal,
    Categorical,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Binary => "binary",
            Self::Ordinal => "ordinal",
            Self::Categorical => "categorical",
        }
    }
}

/// How missing values of a covariate are filled before model fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imputation {
    Mean,
    Mode,
}

/// Registry entry for one baseline covariate
#[derive(Debug, Clone)]
pub struct CovariateMeta {
    pub semantic_type: SemanticType,
    pub unit: Option<&'static str>,
    pub description: &'static str,
}

macro_rules! covariate {
    ($map:ident, $name:literal, $ty:expr, $unit:expr, $desc:literal) => {
        $map.insert($name, CovariateMeta { semantic_type: $ty, unit: $unit, description: $desc });
    };
}

/// The baseline characteristics table for MIMIC-IV ICU cohorts.
///
/// Populated once at first access and immutable afterwards.
static REGISTRY: Lazy<HashMap<&'static str, CovariateMeta>> = Lazy::new(|| {
    use SemanticType::*;
    let mut m = HashMap::new();

    // Demographics
    covariate!(m, "age_at_admission", Continuous, Some("years"), "Patient age at admission (alternative naming)");
    covariate!(m, "anchor_age", Continuous, Some("years"), "Patient age at admission");
    covariate!(m, "gender", Categorical, None, "Patient gender");
    covariate!(m, "race", Categorical, None, "Patient race/ethnicity");
    covariate!(m, "height_cm", Continuous, Some("cm"), "Patient height");
    covariate!(m, "weight_kg", Continuous, Some("kg"), "Patient admission weight");
    covariate!(m, "bmi", Continuous, Some("kg/m^2"), "Body Mass Index, calculated from height and weight");

    // Vital signs (24h average)
    covariate!(m, "temperature", Continuous, Some("degC"), "Average temperature in first 24h");
    covariate!(m, "heart_rate", Continuous, Some("bpm"), "Average heart rate in first 24h");
    covariate!(m, "sbp", Continuous, Some("mmHg"), "Average systolic blood pressure in first 24h");
    covariate!(m, "dbp", Continuous, Some("mmHg"), "Average diastolic blood pressure in first 24h");
    covariate!(m, "respiratory_rate", Continuous, Some("breaths/min"), "Average respiratory rate in first 24h");
    covariate!(m, "spo2", Continuous, Some("%"), "Average SpO2 in first 24h");

    // Laboratory (first value)
    covariate!(m, "ph", Continuous, None, "First pH value");
    covariate!(m, "po2", Continuous, Some("mmHg"), "First partial pressure of oxygen (PO2)");
    covariate!(m, "pco2", Continuous, Some("mmHg"), "First partial pressure of carbon dioxide (PCO2)");
    covariate!(m, "hematocrit", Continuous, Some("%"), "First hematocrit value");
    covariate!(m, "hemoglobin", Continuous, Some("g/dL"), "First hemoglobin value");
    covariate!(m, "wbc", Continuous, Some("K/uL"), "First white blood cell count");
    covariate!(m, "platelets", Continuous, Some("K/uL"), "First platelet count");
    covariate!(m, "sodium", Continuous, Some("mEq/L"), "First sodium level");
    covariate!(m, "potassium", Continuous, Some("mEq/L"), "First potassium level");
    covariate!(m, "chloride", Continuous, Some("mEq/L"), "First chloride level");
    covariate!(m, "glucose", Continuous, Some("mg/dL"), "First glucose level");
    covariate!(m, "d_dimer", Continuous, Some("ng/mL"), "First D-dimer value");
    covariate!(m, "pt", Continuous, Some("seconds"), "First prothrombin time (PT)");
    covariate!(m, "aptt", Continuous, Some("seconds"), "First activated partial thromboplastin time (aPTT)");
    covariate!(m, "bun", Continuous, Some("mg/dL"), "First blood urea nitrogen (BUN)");
    covariate!(m, "creatinine", Continuous, Some("mg/dL"), "First creatinine level");
    covariate!(m, "lactate", Continuous, Some("mmol/L"), "First lactate level");

    // Severity scores
    covariate!(m, "gcs", Ordinal, Some("score"), "Minimum Glasgow Coma Scale in first 24h");
    covariate!(m, "apache_ii", Ordinal, Some("score"), "APACHE II score calculated from first 24h data");
    covariate!(m, "apache_ii_score", Ordinal, Some("score"), "APACHE II score (alternative naming)");
    covariate!(m, "charlson_score", Ordinal, Some("score"), "Charlson comorbidity index score, calculated from ICD codes");

    // Comorbidities
    covariate!(m, "chf", Binary, None, "Presence of congestive heart failure");
    covariate!(m, "mi", Binary, None, "Presence of myocardial infarction history");
    covariate!(m, "pvd", Binary, None, "Presence of peripheral vascular disease");
    covariate!(m, "cvd", Binary, None, "Presence of cerebrovascular disease");
    covariate!(m, "copd", Binary, None, "Presence of chronic obstructive pulmonary disease");
    covariate!(m, "diabetes", Binary, None, "Presence of diabetes");
    covariate!(m, "ckd", Binary, None, "Presence of chronic kidney disease");
    covariate!(m, "liver_disease", Binary, None, "Presence of liver disease");
    covariate!(m, "cancer", Binary, None, "Presence of cancer");
    covariate!(m, "sepsis", Binary, None, "Sepsis diagnosis at admission");

    // Organ support
    covariate!(m, "vasopressor_norepinephrine", Binary, None, "Use of norepinephrine");
    covariate!(m, "vasopressor_phenylephrine", Binary, None, "Use of phenylephrine");
    covariate!(m, "vasopressor_vasopressin", Binary, None, "Use of vasopressin");
    covariate!(m, "vasopressor_epinephrine", Binary, None, "Use of epinephrine");
    covariate!(m, "any_vasopressor", Binary, None, "Binary flag indicating use of any vasopressor");
    covariate!(m, "mechanical_ventilation", Binary, None, "Received mechanical ventilation");
    covariate!(m, "renal_replacement_therapy", Binary, None, "Received renal replacement therapy");

    // Outcome variables (typed for loading; never usable as matching covariates)
    covariate!(m, "outcome_days", Continuous, Some("days"), "Days until outcome event (death/discharge)");
    covariate!(m, "los", Continuous, Some("days"), "Length of stay in ICU");

    m
});

/// Columns that must never enter the propensity model: identifiers, the
/// treatment indicator, outcomes, and post-treatment measurements.
pub const EXCLUDED_COLUMNS: &[&str] = &[
    // Identifiers
    "subject_id",
    "hadm_id",
    "stay_id",
    // Treatment indicator (both spellings seen in upstream cohort builders)
    "treatment_group",
    "treat",
    // Outcomes
    "mortality",
    "death_28d",
    "survival_time_28d",
    "outcome_days",
    "outcome_days_original",
    // Post-treatment timestamps and durations
    "icu_outtime",
    "date_of_death",
    "dod",
    "days_to_death",
    "los",
];

/// Look up the semantic type of a covariate, or None for unknown names.
pub fn type_of(name: &str) -> Option<SemanticType> {
    REGISTRY.get(name).map(|meta| meta.semantic_type)
}

/// Full metadata for a covariate, if registered.
pub fn meta_of(name: &str) -> Option<&'static CovariateMeta> {
    REGISTRY.get(name)
}

/// All registered covariates of a given semantic type, sorted by name for
/// stable iteration order.
pub fn features_of_type(semantic_type: SemanticType) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY
        .iter()
        .filter(|(_, meta)| meta.semantic_type == semantic_type)
        .map(|(name, _)| *name)
        .collect();
    names.sort_unstable();
    names
}

/// Whether a column is barred from the covariate set (leakage guard).
pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_COLUMNS.contains(&name)
}

/// Imputation strategy for a covariate.
///
/// Registered names follow their semantic type (continuous -> mean, everything
/// discrete -> mode). Unknown names fall back on the column dtype: integer
/// columns take the mode, floating columns the mean.
pub fn imputation_for(name: &str, integer_dtype: bool) -> Imputation {
    match type_of(name) {
        Some(SemanticType::Continuous) => Imputation::Mean,
        Some(_) => Imputation::Mode,
        None => {
            if integer_dtype {
                Imputation::Mode
            } else {
                Imputation::Mean
            }
        },
    }
}
