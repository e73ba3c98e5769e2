//! LLM analysis scenarios
//!
//! One module per advisor call the pipeline makes. Each scenario owns its
//! system prompt and typed request/response schema; callers fall back to a
//! deterministic path whenever a scenario errors.

pub mod method_judge;
pub mod summarizer;
