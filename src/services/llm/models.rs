//! LLM data models
//!
//! Scenario tags and the error type shared by the judge and summarizer
//! calls. LLM output is untyped text until parsed into a closed schema;
//! every parse failure surfaces as an error the caller converts into its
//! deterministic fallback.

use serde::{Deserialize, Serialize};

/// LLM analysis scenario type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmScenario {
    /// Pick the best matching method from the balance comparison
    MethodSelection,
    /// Write the structured question/conclusion/PICO summary
    ResultSummary,
}

impl LlmScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodSelection => "method_selection",
            Self::ResultSummary => "result_summary",
        }
    }
}

/// LLM service errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM service disabled")]
    Disabled,

    #[error("LLM API key not configured")]
    NotConfigured,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}
