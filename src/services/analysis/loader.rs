//! Cohort loader
//!
//! Reads the prepared cohort CSV, applies the covariate registry's types,
//! validates the required schema, censors follow-up at the configured
//! horizon, and selects the covariates eligible for matching.

use std::collections::HashSet;
use std::path::Path;

use crate::config::AnalysisConfig;
use crate::utils::stats_ext::StatsExt;

use super::error::AnalysisError;
use super::models::{CategoricalColumn, Cohort, NumericColumn};
use super::registry::{self, SemanticType};

/// Columns handled by the core schema rather than as covariates.
const CORE_COLUMNS: &[&str] =
    &["subject_id", "hadm_id", "stay_id", "treatment_group", "treat", "mortality", "outcome_days"];

/// Load a cohort file and apply registry types and follow-up censoring.
///
/// Fails with `DataUnavailable` when the file cannot be read and
/// `SchemaViolation` when required columns are absent or unusable. Rows
/// with a missing or negative time-to-event are dropped with a warning.
pub fn load(path: &Path, config: &AnalysisConfig) -> Result<Cohort, AnalysisError> {
    if !path.exists() {
        return Err(AnalysisError::DataUnavailable(format!(
            "cohort file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AnalysisError::DataUnavailable(format!("{}: {}", path.display(), e)))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AnalysisError::DataUnavailable(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records: Vec<csv::StringRecord> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AnalysisError::DataUnavailable(e.to_string()))?;
        records.push(record);
    }

    let column_index = |name: &str| headers.iter().position(|h| h == name);

    // The upstream cohort builders used `treatment_group` and `treat`
    // interchangeably; normalize to `treatment_group` and reject files that
    // carry both spellings.
    let treatment_idx = match (column_index("treatment_group"), column_index("treat")) {
        (Some(_), Some(_)) => {
            return Err(AnalysisError::SchemaViolation(
                "both 'treatment_group' and 'treat' present; cohort builder must emit one".into(),
            ));
        },
        (Some(idx), None) => idx,
        (None, Some(idx)) => {
            tracing::info!("Treatment column 'treat' normalized to 'treatment_group'");
            idx
        },
        (None, None) => {
            return Err(AnalysisError::SchemaViolation(
                "missing required column: treatment_group".into(),
            ));
        },
    };

    let subject_idx = column_index("subject_id")
        .ok_or_else(|| AnalysisError::SchemaViolation("missing required column: subject_id".into()))?;
    let mortality_idx = column_index("mortality")
        .ok_or_else(|| AnalysisError::SchemaViolation("missing required column: mortality".into()))?;
    let outcome_idx = column_index("outcome_days").ok_or_else(|| {
        AnalysisError::SchemaViolation("missing time-to-event column: outcome_days".into())
    })?;
    let hadm_idx = column_index("hadm_id");
    let stay_idx = column_index("stay_id");

    let mut subject_id = Vec::new();
    let mut hadm_id = Vec::new();
    let mut stay_id = Vec::new();
    let mut treatment = Vec::new();
    let mut mortality = Vec::new();
    let mut outcome_days_original = Vec::new();
    let mut kept_rows: Vec<usize> = Vec::new();
    let mut dropped_time = 0usize;

    for (row, record) in records.iter().enumerate() {
        let sid = parse_i64(record.get(subject_idx)).ok_or_else(|| {
            AnalysisError::SchemaViolation(format!("row {}: unparseable subject_id", row + 1))
        })?;
        let treat = parse_indicator(record.get(treatment_idx)).ok_or_else(|| {
            AnalysisError::SchemaViolation(format!(
                "row {}: treatment_group must be 0 or 1",
                row + 1
            ))
        })?;
        let event = parse_indicator(record.get(mortality_idx)).ok_or_else(|| {
            AnalysisError::SchemaViolation(format!("row {}: mortality must be 0 or 1", row + 1))
        })?;

        let days = parse_f64(record.get(outcome_idx));
        let days = match days {
            Some(d) if d >= 0.0 => d,
            _ => {
                dropped_time += 1;
                continue;
            },
        };

        subject_id.push(sid);
        hadm_id.push(hadm_idx.and_then(|i| parse_i64(record.get(i))));
        stay_id.push(stay_idx.and_then(|i| parse_i64(record.get(i))));
        treatment.push(treat);
        mortality.push(event);
        outcome_days_original.push(days);
        kept_rows.push(row);
    }

    if dropped_time > 0 {
        tracing::warn!(
            "Dropped {} rows with missing or negative outcome_days",
            dropped_time
        );
    }

    if subject_id.is_empty() {
        return Err(AnalysisError::SchemaViolation("cohort has no usable rows".into()));
    }

    // stay_id uniqueness is an invariant of the row-per-stay contract
    let mut seen_stays = HashSet::new();
    for sid in stay_id.iter().flatten() {
        if !seen_stays.insert(*sid) {
            return Err(AnalysisError::SchemaViolation(format!("duplicate stay_id: {}", sid)));
        }
    }

    // Censor follow-up at the configured horizon; events past it become
    // non-events at the cap. Pre-cap values are preserved for audit.
    let horizon = config.follow_up_days;
    let mut outcome_days = Vec::with_capacity(outcome_days_original.len());
    let mut censored = 0usize;
    for (days, event) in outcome_days_original.iter().zip(mortality.iter_mut()) {
        if *days > horizon {
            outcome_days.push(horizon);
            *event = 0;
            censored += 1;
        } else {
            outcome_days.push(*days);
        }
    }
    if censored > 0 {
        tracing::info!("Censored {} patients at day {}", censored, horizon);
    }

    // Remaining columns become typed covariates: registered categorical
    // columns stay as strings, everything parseable as numbers becomes a
    // numeric column, anything else is ignored.
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();

    for (col, name) in headers.iter().enumerate() {
        if CORE_COLUMNS.contains(&name.as_str()) {
            continue;
        }

        if registry::type_of(name) == Some(SemanticType::Categorical) {
            let values: Vec<Option<String>> = kept_rows
                .iter()
                .map(|&row| {
                    records[row]
                        .get(col)
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                })
                .collect();
            categorical.push(CategoricalColumn { name: name.clone(), values });
            continue;
        }

        let mut values = Vec::with_capacity(kept_rows.len());
        let mut integer_like = true;
        let mut any_numeric = false;
        let mut unparseable = false;
        for &row in &kept_rows {
            match records[row].get(col).map(str::trim) {
                None | Some("") => values.push(f64::NAN),
                Some(raw) => match raw.parse::<f64>() {
                    Ok(v) => {
                        if v.fract() != 0.0 {
                            integer_like = false;
                        }
                        any_numeric = true;
                        values.push(v);
                    },
                    Err(_) => {
                        unparseable = true;
                        break;
                    },
                },
            }
        }

        if unparseable || !any_numeric {
            tracing::debug!("Ignoring non-numeric column '{}'", name);
            continue;
        }

        if registry::type_of(name) == Some(SemanticType::Binary) {
            let out_of_range = values
                .iter()
                .filter(|v| !v.is_nan() && **v != 0.0 && **v != 1.0)
                .count();
            if out_of_range > 0 {
                tracing::warn!(
                    "Binary column '{}' has {} values outside {{0, 1}}",
                    name,
                    out_of_range
                );
            }
        }

        numeric.push(NumericColumn { name: name.clone(), values, integer_like });
    }

    let cohort = Cohort {
        n: subject_id.len(),
        subject_id,
        hadm_id,
        stay_id,
        treatment,
        mortality,
        outcome_days,
        outcome_days_original,
        numeric,
        categorical,
    };

    tracing::info!(
        "Loaded {} patients ({} treated, {} control), {} numeric columns",
        cohort.n,
        cohort.n_treated(),
        cohort.n_control(),
        cohort.numeric.len()
    );

    Ok(cohort)
}

/// Automatic covariate selection for matching: every numeric column outside
/// the exclusion set whose missing-rate stays within the threshold.
pub fn select_covariates(cohort: &Cohort, missingness_threshold: f64) -> Vec<String> {
    let mut selected = Vec::new();
    for column in &cohort.numeric {
        if registry::is_excluded(&column.name) {
            continue;
        }
        let missing = column.missing_rate();
        if missing <= missingness_threshold {
            selected.push(column.name.clone());
        } else {
            tracing::debug!(
                "Excluding '{}' from matching (missing rate {:.1}% > {:.1}%)",
                column.name,
                missing * 100.0,
                missingness_threshold * 100.0
            );
        }
    }
    selected
}

/// Build the imputed covariate matrix used by the matching methods.
///
/// Returns a row-major matrix (cohort.n x covariates.len()) with missing
/// values filled per the registry policy. An all-missing column imputes to
/// zero with a warning.
pub fn imputed_matrix(cohort: &Cohort, covariates: &[String]) -> ndarray::Array2<f64> {
    let mut matrix = ndarray::Array2::zeros((cohort.n, covariates.len()));
    for (j, name) in covariates.iter().enumerate() {
        let column = match cohort.numeric_column(name) {
            Some(c) => c,
            None => continue,
        };

        let fill = match registry::imputation_for(name, column.integer_like) {
            registry::Imputation::Mean => column.values.mean_ignore_nan(),
            registry::Imputation::Mode => column.values.mode_ignore_nan(),
        };
        let fill = match fill {
            Some(v) => v,
            None => {
                tracing::warn!("Column '{}' contains only missing values; filling with 0", name);
                0.0
            },
        };

        for (i, &v) in column.values.iter().enumerate() {
            matrix[[i, j]] = if v.is_nan() { fill } else { v };
        }
    }
    matrix
}

fn parse_i64(value: Option<&str>) -> Option<i64> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn parse_indicator(value: Option<&str>) -> Option<u8> {
    match parse_f64(value)? {
        v if v == 0.0 => Some(0),
        v if v == 1.0 => Some(1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn load_applies_censoring_and_keeps_original() {
        let file = write_csv(
            "subject_id,stay_id,treatment_group,mortality,outcome_days,anchor_age\n\
             1,100,1,1,35,60\n\
             2,101,0,1,10,70\n\
             3,102,0,0,28,65\n",
        );
        let cohort = load(file.path(), &AnalysisConfig::default()).unwrap();
        assert_eq!(cohort.n, 3);
        // event past day 28 is censored into a non-event at the horizon
        assert_eq!(cohort.outcome_days[0], 28.0);
        assert_eq!(cohort.mortality[0], 0);
        assert_eq!(cohort.outcome_days_original[0], 35.0);
        // events inside the horizon are untouched
        assert_eq!(cohort.mortality[1], 1);
        assert_eq!(cohort.outcome_days[1], 10.0);
    }

    #[test]
    fn load_accepts_treat_alias() {
        let file = write_csv(
            "subject_id,treat,mortality,outcome_days\n1,1,0,5\n2,0,1,3\n",
        );
        let cohort = load(file.path(), &AnalysisConfig::default()).unwrap();
        assert_eq!(cohort.treatment, vec![1, 0]);
    }

    #[test]
    fn load_rejects_both_treatment_spellings() {
        let file = write_csv(
            "subject_id,treat,treatment_group,mortality,outcome_days\n1,1,1,0,5\n",
        );
        let err = load(file.path(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaViolation(_)));
    }

    #[test]
    fn load_rejects_missing_required_columns() {
        let file = write_csv("subject_id,outcome_days\n1,5\n");
        let err = load(file.path(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaViolation(_)));
    }

    #[test]
    fn load_missing_file_is_data_unavailable() {
        let err = load(
            Path::new("/nonexistent/cohort.csv"),
            &AnalysisConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::DataUnavailable(_)));
    }

    #[test]
    fn load_rejects_duplicate_stay_id() {
        let file = write_csv(
            "subject_id,stay_id,treatment_group,mortality,outcome_days\n\
             1,100,1,0,5\n\
             2,100,0,0,5\n",
        );
        let err = load(file.path(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::SchemaViolation(_)));
    }

    #[test]
    fn covariate_selection_honors_exclusions_and_missingness() {
        let file = write_csv(
            "subject_id,treatment_group,mortality,outcome_days,anchor_age,los,sparse\n\
             1,1,0,5,60,3,\n\
             2,0,0,5,61,4,\n\
             3,0,1,5,62,5,\n\
             4,1,1,5,63,6,1.5\n",
        );
        let cohort = load(file.path(), &AnalysisConfig::default()).unwrap();
        let covariates = select_covariates(&cohort, 0.20);
        assert!(covariates.contains(&"anchor_age".to_string()));
        // post-treatment duration must never enter the propensity model
        assert!(!covariates.contains(&"los".to_string()));
        // 75% missing exceeds the 20% threshold
        assert!(!covariates.contains(&"sparse".to_string()));
    }

    #[test]
    fn imputed_matrix_fills_by_type() {
        let file = write_csv(
            "subject_id,treatment_group,mortality,outcome_days,anchor_age,chf\n\
             1,1,0,5,60,1\n\
             2,0,0,5,,1\n\
             3,0,1,5,70,\n\
             4,1,1,5,80,0\n",
        );
        let cohort = load(file.path(), &AnalysisConfig::default()).unwrap();
        let covariates = vec!["anchor_age".to_string(), "chf".to_string()];
        let matrix = imputed_matrix(&cohort, &covariates);
        // continuous -> mean of observed (60 + 70 + 80) / 3
        assert!((matrix[[1, 0]] - 70.0).abs() < 1e-12);
        // binary -> mode (1 appears twice)
        assert_eq!(matrix[[2, 1]], 1.0);
    }
}
