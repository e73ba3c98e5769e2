pub mod agent_service;
pub mod analysis;
pub mod llm;

pub use agent_service::{StatisticianService, ValidatedRun, AGENT_NAME};
pub use analysis::{AnalysisError, MatchMethod, PipelineOutput, Stage, StageError};
pub use llm::{LlmClient, LlmError, LlmScenario};
