//! Statistician agent service
//!
//! Validates run parameters, resolves the cohort/output paths inside the
//! workspace, and executes the analysis workflow on a blocking worker so
//! the caller's event loop stays responsive. The in-process job registry
//! is the source of truth for job status; it is written by the worker and
//! the progress callback only.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{AgentResult, AgentStatus, RunParams};
use crate::services::analysis::workflow::{self, RunContext};
use crate::services::llm::LlmClient;

pub const AGENT_NAME: &str = "statistician";

/// Trial identifiers follow the registry format: NCT + 8 digits
static TRIAL_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^NCT\d{8}$").expect("trial id regex"));

/// Resolved and validated inputs of one run
#[derive(Debug, Clone)]
pub struct ValidatedRun {
    pub trial_id: String,
    pub medication: String,
    pub cohort_path: PathBuf,
    pub output_dir: PathBuf,
}

/// The agent wrapper around the analytical pipeline
pub struct StatisticianService {
    config: Config,
    jobs: Arc<DashMap<String, AgentResult>>,
}

impl StatisticianService {
    pub fn new(config: Config) -> Self {
        Self { config, jobs: Arc::new(DashMap::new()) }
    }

    /// Validate inputs and resolve paths, creating the output directory.
    ///
    /// Layout contract with the upstream cohort builder:
    /// `<workspace>/project/<trial_id>/cohorts/<medication>/cohort.csv`,
    /// artifacts under the sibling `outputs/` directory.
    pub fn validate(
        &self,
        trial_id: &str,
        medication: &str,
        workspace_root: Option<&str>,
    ) -> Result<ValidatedRun, String> {
        let trial_id = trial_id.trim().to_uppercase();
        if !TRIAL_ID_REGEX.is_match(&trial_id) {
            return Err(format!(
                "Invalid trial id '{}': expected NCT followed by 8 digits",
                trial_id
            ));
        }

        let medication: String = medication
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if medication.is_empty() {
            return Err("Medication name is empty after sanitization".to_string());
        }

        let root = workspace_root.unwrap_or(&self.config.workspace.root);
        let cohort_dir = PathBuf::from(root)
            .join("project")
            .join(&trial_id)
            .join("cohorts")
            .join(&medication);
        let cohort_path = cohort_dir.join("cohort.csv");
        if !cohort_path.exists() {
            return Err(format!("Cohort file not found: {}", cohort_path.display()));
        }

        let output_dir = cohort_dir.join("outputs");
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| format!("Cannot create output directory: {}", e))?;

        Ok(ValidatedRun { trial_id, medication, cohort_path, output_dir })
    }

    /// Execute a run. Never panics or raises: every failure lands in the
    /// returned record. Returns the job id alongside the final record.
    pub async fn run(&self, params: RunParams) -> (String, AgentResult) {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.jobs.insert(job_id.clone(), AgentResult::pending(AGENT_NAME));
        tracing::info!("[{}] Statistician run requested: {:?}", job_id, params.trial_id);

        let validated = match self.validate(
            &params.trial_id,
            &params.medication,
            params.workspace_root.as_deref(),
        ) {
            Ok(v) => v,
            Err(message) => {
                tracing::warn!("[{}] Validation failed: {}", job_id, message);
                let result = self.finish_failed(&job_id, &message, serde_json::json!([]));
                return (job_id, result);
            },
        };

        self.update(&job_id, |record| {
            record.transition(AgentStatus::Processing);
            record.output_dir = Some(validated.output_dir.display().to_string());
            record.metadata = serde_json::json!({
                "trial_id": validated.trial_id,
                "medication": validated.medication,
                "cohort_path": validated.cohort_path.display().to_string(),
                "progress": [],
            });
        });

        let mut llm_config = self.config.llm.clone();
        if let Some(key) = &params.llm_api_key {
            llm_config.api_key = Some(key.clone());
        }
        let analysis_config = self.config.analysis.clone();
        let jobs = Arc::clone(&self.jobs);
        let progress_job_id = job_id.clone();
        let run_inputs = validated.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let llm_client = (llm_config.enabled && llm_config.api_key.is_some())
                .then(|| LlmClient::new(llm_config));

            let progress = move |message: &str| {
                if let Some(mut record) = jobs.get_mut(&progress_job_id) {
                    if let Some(log) = record
                        .metadata
                        .get_mut("progress")
                        .and_then(|p| p.as_array_mut())
                    {
                        log.push(serde_json::Value::String(message.to_string()));
                    }
                    record.touch();
                }
            };

            let ctx = RunContext {
                trial_id: &run_inputs.trial_id,
                medication: &run_inputs.medication,
                cohort_path: &run_inputs.cohort_path,
                output_dir: &run_inputs.output_dir,
                config: &analysis_config,
                llm: llm_client.as_ref(),
                progress: Some(&progress),
            };
            workflow::run(&ctx)
        })
        .await;

        let result = match outcome {
            Ok(Ok(output)) => {
                let stage_errors = serde_json::to_value(&output.stage_errors)
                    .unwrap_or(serde_json::Value::Null);
                let result_data =
                    serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
                self.update(&job_id, move |record| {
                    record.result_data = result_data.clone();
                    if let Some(meta) = record.metadata.as_object_mut() {
                        meta.insert("stage_errors".to_string(), stage_errors.clone());
                    }
                    record.transition(AgentStatus::Completed);
                });
                tracing::info!("[{}] Statistician run completed", job_id);
                self.jobs.get(&job_id).map(|r| r.clone()).expect("job record exists")
            },
            Ok(Err(failure)) => {
                tracing::warn!(
                    "[{}] Run failed at stage {}: {}",
                    job_id,
                    failure.stage.as_str(),
                    failure.error
                );
                let stage_errors = serde_json::to_value(&failure.stage_errors)
                    .unwrap_or(serde_json::Value::Null);
                self.finish_failed(&job_id, &failure.error.to_string(), stage_errors)
            },
            Err(join_error) => {
                // a panicking worker must still yield a structured result
                tracing::error!("[{}] Analysis worker panicked: {}", job_id, join_error);
                self.finish_failed(
                    &job_id,
                    &format!("analysis worker panicked: {}", join_error),
                    serde_json::Value::Null,
                )
            },
        };

        (job_id, result)
    }

    /// Current record of a job, if known.
    pub fn status(&self, job_id: &str) -> Option<AgentResult> {
        self.jobs.get(job_id).map(|r| r.clone())
    }

    /// All known job ids.
    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut AgentResult)) {
        if let Some(mut record) = self.jobs.get_mut(job_id) {
            f(&mut record);
        }
    }

    fn finish_failed(
        &self,
        job_id: &str,
        message: &str,
        stage_errors: serde_json::Value,
    ) -> AgentResult {
        self.update(job_id, |record| {
            record.error = Some(message.to_string());
            if let Some(meta) = record.metadata.as_object_mut() {
                meta.insert("stage_errors".to_string(), stage_errors.clone());
            }
            record.transition(AgentStatus::Failed);
        });
        self.jobs
            .get(job_id)
            .map(|r| r.clone())
            .unwrap_or_else(|| AgentResult::pending(AGENT_NAME))
    }
}
