//! Agent wrapper end-to-end
//!
//! The wrapper must resolve the workspace layout, run the analysis on a
//! worker, keep the job registry consistent, and never surface a raw
//! error: every failure mode lands inside an AgentResult.

use super::common;
use crate::config::Config;
use crate::models::{AgentStatus, RunParams};
use crate::services::agent_service::StatisticianService;

fn workspace_with_cohort(csv: &str) -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let cohort_dir = dir
        .path()
        .join("project/NCT03389555/cohorts/hydrocortisone");
    std::fs::create_dir_all(&cohort_dir).unwrap();
    std::fs::write(cohort_dir.join("cohort.csv"), csv).unwrap();

    let mut config = Config::default();
    config.workspace.root = dir.path().display().to_string();
    config.llm.enabled = false;
    (dir, config)
}

fn params() -> RunParams {
    RunParams {
        trial_id: "NCT03389555".to_string(),
        medication: "hydrocortisone".to_string(),
        workspace_root: None,
        llm_api_key: None,
    }
}

#[tokio::test]
async fn successful_run_completes_with_artifacts_and_progress() {
    let csv = common::balanced_cohort(300, 100, 47);
    let (dir, config) = workspace_with_cohort(&csv);
    let service = StatisticianService::new(config);

    let (job_id, result) = service.run(params()).await;

    assert_eq!(result.status, AgentStatus::Completed);
    assert_eq!(result.agent_name, "statistician");
    assert!(result.error.is_none());
    assert!(result.updated_at >= result.created_at);

    // registry record matches the returned one
    let stored = service.status(&job_id).expect("job tracked");
    assert_eq!(stored.status, AgentStatus::Completed);
    assert!(service.job_ids().contains(&job_id));

    // progress log captured stage messages via the callback
    let progress = stored.metadata["progress"].as_array().unwrap();
    assert!(progress.len() >= 5, "progress log too short: {progress:?}");
    assert!(progress
        .iter()
        .any(|m| m.as_str().unwrap().contains("matching algorithms")));

    // result payload carries the pipeline output
    assert!(stored.result_data["survival"].is_object());
    assert!(stored.result_data["selection"]["selected_method"].is_string());

    // artifacts landed in the resolved output directory
    let outputs = dir
        .path()
        .join("project/NCT03389555/cohorts/hydrocortisone/outputs");
    assert!(outputs.join("main_survival_summary.csv").exists());
    assert!(outputs.join("baseline_table_main_JAMA.md").exists());
}

#[tokio::test]
async fn invalid_trial_id_fails_without_raising() {
    let csv = common::balanced_cohort(100, 30, 53);
    let (_dir, config) = workspace_with_cohort(&csv);
    let service = StatisticianService::new(config);

    let mut bad = params();
    bad.trial_id = "TRIAL-1".to_string();
    let (job_id, result) = service.run(bad).await;

    assert_eq!(result.status, AgentStatus::Failed);
    assert!(result.error.as_ref().unwrap().contains("Invalid trial id"));
    assert_eq!(service.status(&job_id).unwrap().status, AgentStatus::Failed);
}

#[tokio::test]
async fn missing_cohort_file_fails_cleanly() {
    let (_dir, config) = {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.root = dir.path().display().to_string();
        config.llm.enabled = false;
        (dir, config)
    };
    let service = StatisticianService::new(config);

    let (_job_id, result) = service.run(params()).await;
    assert_eq!(result.status, AgentStatus::Failed);
    assert!(result.error.as_ref().unwrap().contains("Cohort file not found"));
}

#[tokio::test]
async fn unreadable_cohort_schema_is_reported_in_stage_errors() {
    // file exists but misses the mortality column entirely
    let (_dir, config) = workspace_with_cohort("subject_id,treatment_group,outcome_days\n1,1,5\n");
    let service = StatisticianService::new(config);

    let (job_id, result) = service.run(params()).await;
    assert_eq!(result.status, AgentStatus::Failed);
    assert!(result.error.as_ref().unwrap().contains("mortality"));

    let stored = service.status(&job_id).unwrap();
    let stage_errors = stored.metadata["stage_errors"].as_array().unwrap();
    assert!(stage_errors
        .iter()
        .any(|e| e["kind"] == "schema_violation" && e["stage"] == "load"));
}
