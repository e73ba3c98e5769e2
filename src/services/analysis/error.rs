//! Error taxonomy for the analytical pipeline
//!
//! Fatal errors abort the run (the agent result flips to `failed`); every
//! other variant is recorded in the run's stage-error list while the
//! pipeline carries on with the affected section nulled out.

/// Typed failure modes of the statistician pipeline
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Cohort data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Cohort schema violation: {0}")]
    SchemaViolation(String),

    #[error("Degenerate match for {method}: {detail}")]
    DegenerateMatch { method: String, detail: String },

    #[error("Survival model fit failure: {0}")]
    ModelFitFailure(String),

    #[error("Heterogeneous-effect estimation failure: {0}")]
    HeterogeneityFailure(String),

    #[error("External service failure: {0}")]
    ExternalServiceFailure(String),

    #[error("Artifact rendering failure: {0}")]
    RenderFailure(String),
}

impl AnalysisError {
    /// Fatal errors terminate the run; the rest degrade it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DataUnavailable(_) | Self::SchemaViolation(_))
    }

    /// Short stable tag used in stage-error records and artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable(_) => "data_unavailable",
            Self::SchemaViolation(_) => "schema_violation",
            Self::DegenerateMatch { .. } => "degenerate_match",
            Self::ModelFitFailure(_) => "model_fit_failure",
            Self::HeterogeneityFailure(_) => "heterogeneity_failure",
            Self::ExternalServiceFailure(_) => "external_service_failure",
            Self::RenderFailure(_) => "render_failure",
        }
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        Self::DataUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_split_matches_policy() {
        assert!(AnalysisError::DataUnavailable("missing".into()).is_fatal());
        assert!(AnalysisError::SchemaViolation("no mortality column".into()).is_fatal());
        assert!(!AnalysisError::ModelFitFailure("singular".into()).is_fatal());
        assert!(!AnalysisError::HeterogeneityFailure("fit".into()).is_fatal());
        assert!(
            !AnalysisError::DegenerateMatch { method: "psm".into(), detail: "3 pairs".into() }
                .is_fatal()
        );
    }
}
