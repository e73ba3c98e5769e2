//! Cross-service tests
//!
//! Unit tests live next to their modules; everything here exercises the
//! pipeline and the agent wrapper end to end over seeded synthetic
//! cohorts.

mod common;

mod agent_service_test;
mod determinism_test;
mod pipeline_scenarios_test;
