//! LLM integration
//!
//! The pipeline treats the language model strictly as an advisor: the
//! method judge and the result summarizer both have deterministic fallbacks
//! and a bounded timeout, so an unreachable endpoint degrades the run
//! instead of failing it.

pub mod client;
pub mod models;
pub mod scenarios;

pub use client::LlmClient;
pub use models::{LlmError, LlmScenario};
