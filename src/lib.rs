//! Statistician Library
//!
//! Core modules of the RWE trial-emulation engine: the analytical pipeline
//! (cohort loading, multi-method matching, balance diagnostics, survival
//! and heterogeneous-effect models, artifact rendering), the LLM advisor
//! integration, and the agent wrapper that runs analyses on worker threads.

use std::sync::Arc;

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use models::{AgentResult, AgentStatus, RunParams};
pub use services::llm::{LlmClient, LlmError};
pub use services::{AnalysisError, MatchMethod, PipelineOutput, Stage, StatisticianService};

/// Application shared state
///
/// Rust's type system is the DI container: services are Arc-wrapped for
/// cheap cloning into handlers and worker tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub statistician: Arc<StatisticianService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let statistician = Arc::new(StatisticianService::new(config.clone()));
        Self { config, statistician }
    }
}
