//! Statistician analytical pipeline
//!
//! Deterministic multi-method causal-inference engine for emulated ICU
//! trials.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        workflow::run()                        │
//! │                                                              │
//! │  loader ──► matching (psm / psm_caliper / mahalanobis /      │
//! │     │                 iptw, in parallel)                     │
//! │     │           │                                            │
//! │     │           ▼                                            │
//! │     │       balance ──► selection (numeric rank + LLM judge) │
//! │     │                        │                               │
//! │     ▼                        ▼                               │
//! │  registry            survival (KM / log-rank / Cox)          │
//! │  (types +                    │                               │
//! │   leakage              forest (CATE)                         │
//! │   guard)                     │                               │
//! │                        render (tables, plots, summary)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stage consumes the immutable [`models::Cohort`] loaded once per
//! run; randomized elements are seeded from the run configuration so two
//! runs over identical inputs produce identical artifacts.

pub mod balance;
pub mod error;
pub mod forest;
pub mod loader;
pub mod matching;
pub mod models;
pub mod registry;
pub mod render;
pub mod selection;
pub mod summary;
pub mod survival;
pub mod workflow;

pub use error::AnalysisError;
pub use models::{MatchMethod, MatchedSample};
pub use workflow::{PipelineOutput, RunContext, Stage, StageError};
