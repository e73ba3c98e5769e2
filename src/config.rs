use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub analysis: AnalysisConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root directory holding project/<trial_id>/cohorts/<medication>/ trees
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: ".".to_string() }
    }
}

/// Tunables for the analytical core.
///
/// Every knob the pipeline reads lives here as an explicit field; modules
/// receive this record by reference and never consult process-wide state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Covariates with a higher missing fraction are dropped from matching (default: 0.20)
    pub missingness_threshold: f64,
    /// Maximum propensity difference tolerated by caliper matching (default: 0.01)
    pub caliper: f64,
    /// Censor horizon in days (default: 28)
    pub follow_up_days: f64,
    /// |SMD| below this counts as balanced (default: 0.10)
    pub smd_balanced_threshold: f64,
    pub propensity_model: PropensityModelConfig,
    pub causal_forest: CausalForestConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            missingness_threshold: 0.20,
            caliper: 0.01,
            follow_up_days: 28.0,
            smd_balanced_threshold: 0.10,
            propensity_model: PropensityModelConfig::default(),
            causal_forest: CausalForestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PropensityModelConfig {
    /// Maximum IRLS iterations for the logistic propensity model (default: 1000)
    pub max_iter: usize,
    pub random_state: u64,
}

impl Default for PropensityModelConfig {
    fn default() -> Self {
        Self { max_iter: 1000, random_state: 42 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CausalForestConfig {
    pub n_estimators: usize,
    pub min_samples_leaf: usize,
    pub random_state: u64,
}

impl Default for CausalForestConfig {
    fn default() -> Self {
        Self { n_estimators: 100, min_samples_leaf: 10, random_state: 42 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Whether LLM-backed method selection / summarization is attempted at all
    pub enabled: bool,
    /// OpenAI-compatible chat completions base URL
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    /// API key; prefer the APP_LLM_API_KEY environment variable over the file
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            timeout_seconds: 30,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,statistician=debug".to_string(), file: None }
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "statistician")]
#[command(version, about = "Statistician - RWE trial emulation engine")]
pub struct CommandLineArgs {
    /// Trial registry identifier (e.g. NCT03389555)
    #[arg(long, value_name = "NCT_ID")]
    pub trial_id: Option<String>,

    /// Treatment medication name
    #[arg(long, value_name = "NAME")]
    pub medication: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Workspace root (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub workspace_root: Option<String>,

    /// Missingness threshold for covariate selection (overrides config file)
    #[arg(long, value_name = "FRACTION")]
    pub missingness_threshold: Option<f64>,

    /// Caliper width on the propensity scale (overrides config file)
    #[arg(long, value_name = "WIDTH")]
    pub caliper: Option<f64>,

    /// Follow-up censor horizon in days (overrides config file)
    #[arg(long, value_name = "DAYS")]
    pub follow_up_days: Option<f64>,

    /// LLM API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub llm_api_key: Option<String>,

    /// Disable the LLM judge and summarizer (deterministic fallbacks only)
    #[arg(long)]
    pub no_llm: bool,

    /// Logging level (overrides config file, e.g., "info,statistician=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_WORKSPACE_ROOT: Workspace root directory
    /// - APP_MISSINGNESS_THRESHOLD: Covariate missingness cutoff (e.g., "0.2")
    /// - APP_CALIPER: Caliper width on the propensity scale
    /// - APP_FOLLOW_UP_DAYS: Censor horizon in days
    /// - APP_LLM_API_KEY: API key for the LLM judge/summarizer
    /// - APP_LLM_ENDPOINT: OpenAI-compatible base URL
    /// - APP_LLM_MODEL: Model identifier
    /// - APP_LLM_ENABLED: Enable/disable LLM calls (true/false)
    /// - APP_LOG_LEVEL: Logging level (e.g., "info,statistician=debug")
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("APP_WORKSPACE_ROOT") {
            self.workspace.root = root;
            tracing::info!("Override workspace.root from env: {}", self.workspace.root);
        }

        if let Ok(threshold) = std::env::var("APP_MISSINGNESS_THRESHOLD") {
            match threshold.parse() {
                Ok(val) => {
                    self.analysis.missingness_threshold = val;
                    tracing::info!(
                        "Override analysis.missingness_threshold from env: {}",
                        self.analysis.missingness_threshold
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_MISSINGNESS_THRESHOLD '{}': {} (keep {})",
                    threshold,
                    e,
                    self.analysis.missingness_threshold
                ),
            }
        }

        if let Ok(caliper) = std::env::var("APP_CALIPER") {
            match caliper.parse() {
                Ok(val) => {
                    self.analysis.caliper = val;
                    tracing::info!("Override analysis.caliper from env: {}", self.analysis.caliper);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_CALIPER '{}': {} (keep {})",
                    caliper,
                    e,
                    self.analysis.caliper
                ),
            }
        }

        if let Ok(days) = std::env::var("APP_FOLLOW_UP_DAYS") {
            match days.parse() {
                Ok(val) => {
                    self.analysis.follow_up_days = val;
                    tracing::info!(
                        "Override analysis.follow_up_days from env: {}",
                        self.analysis.follow_up_days
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_FOLLOW_UP_DAYS '{}': {} (keep {})",
                    days,
                    e,
                    self.analysis.follow_up_days
                ),
            }
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(endpoint) = std::env::var("APP_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
            tracing::info!("Override llm.endpoint from env: {}", self.llm.endpoint);
        }

        if let Ok(model) = std::env::var("APP_LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(enabled) = std::env::var("APP_LLM_ENABLED") {
            match enabled.parse() {
                Ok(val) => {
                    self.llm.enabled = val;
                    tracing::info!("Override llm.enabled from env: {}", self.llm.enabled);
                },
                Err(_) => tracing::warn!(
                    "Invalid APP_LLM_ENABLED '{}' (keep {})",
                    enabled,
                    self.llm.enabled
                ),
            }
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(root) = &args.workspace_root {
            self.workspace.root = root.clone();
            tracing::info!("Override workspace.root from CLI: {}", self.workspace.root);
        }

        if let Some(threshold) = args.missingness_threshold {
            self.analysis.missingness_threshold = threshold;
            tracing::info!(
                "Override analysis.missingness_threshold from CLI: {}",
                self.analysis.missingness_threshold
            );
        }

        if let Some(caliper) = args.caliper {
            self.analysis.caliper = caliper;
            tracing::info!("Override analysis.caliper from CLI: {}", self.analysis.caliper);
        }

        if let Some(days) = args.follow_up_days {
            self.analysis.follow_up_days = days;
            tracing::info!(
                "Override analysis.follow_up_days from CLI: {}",
                self.analysis.follow_up_days
            );
        }

        if let Some(key) = &args.llm_api_key {
            self.llm.api_key = Some(key.clone());
            tracing::info!("Override llm.api_key from CLI");
        }

        if args.no_llm {
            self.llm.enabled = false;
            tracing::info!("LLM judge/summarizer disabled from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if !(0.0..=1.0).contains(&self.analysis.missingness_threshold) {
            anyhow::bail!("analysis.missingness_threshold must be within [0, 1]");
        }

        if self.analysis.caliper <= 0.0 {
            anyhow::bail!("analysis.caliper must be > 0");
        }

        if self.analysis.follow_up_days <= 0.0 {
            anyhow::bail!("analysis.follow_up_days must be > 0");
        }

        if self.analysis.smd_balanced_threshold <= 0.0 {
            anyhow::bail!("analysis.smd_balanced_threshold must be > 0");
        }

        if self.analysis.propensity_model.max_iter == 0 {
            anyhow::bail!("analysis.propensity_model.max_iter must be > 0");
        }

        if self.analysis.causal_forest.n_estimators == 0 {
            anyhow::bail!("analysis.causal_forest.n_estimators must be > 0");
        }

        if self.analysis.causal_forest.min_samples_leaf == 0 {
            anyhow::bail!("analysis.causal_forest.min_samples_leaf must be > 0");
        }

        if self.llm.enabled && self.llm.endpoint.is_empty() {
            anyhow::bail!("llm.endpoint cannot be empty while llm.enabled = true");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.analysis.missingness_threshold, 0.20);
        assert_eq!(config.analysis.caliper, 0.01);
        assert_eq!(config.analysis.follow_up_days, 28.0);
        assert_eq!(config.analysis.smd_balanced_threshold, 0.10);
        assert_eq!(config.analysis.propensity_model.max_iter, 1000);
        assert_eq!(config.analysis.causal_forest.n_estimators, 100);
        assert_eq!(config.analysis.causal_forest.min_samples_leaf, 10);
        assert_eq!(config.analysis.causal_forest.random_state, 42);
    }

    #[test]
    fn validate_rejects_zero_caliper() {
        let mut config = Config::default();
        config.analysis.caliper = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_missingness() {
        let mut config = Config::default();
        config.analysis.missingness_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_section_overrides_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [analysis]
            caliper = 0.05
            follow_up_days = 90

            [analysis.causal_forest]
            n_estimators = 250
            "#,
        )
        .unwrap();
        assert_eq!(parsed.analysis.caliper, 0.05);
        assert_eq!(parsed.analysis.follow_up_days, 90.0);
        assert_eq!(parsed.analysis.causal_forest.n_estimators, 250);
        // untouched sections keep their defaults
        assert_eq!(parsed.analysis.missingness_threshold, 0.20);
        assert_eq!(parsed.analysis.causal_forest.min_samples_leaf, 10);
    }
}
