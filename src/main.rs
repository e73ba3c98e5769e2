use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statistician::config::{CommandLineArgs, Config};
use statistician::models::RunParams;
use statistician::{AgentStatus, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CommandLineArgs::parse();
    let config = Config::load(&cli_args)?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // file logging keeps a guard alive for the process lifetime
    let _log_guard;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("statistician.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = guard;
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Statistician starting up");

    let (Some(trial_id), Some(medication)) = (cli_args.trial_id.clone(), cli_args.medication.clone())
    else {
        eprintln!("Usage: statistician --trial-id NCT######## --medication <name> [options]");
        std::process::exit(2);
    };

    let state = AppState::new(config);

    let params = RunParams {
        trial_id,
        medication,
        workspace_root: None,
        llm_api_key: None,
    };

    let (job_id, result) = state.statistician.run(params).await;
    tracing::info!("Job {} finished with status {}", job_id, result.status.as_str());

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status != AgentStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
