mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use consolidator_core::{
    load_config_or_default, metrics, validate_config, Config, DownloadTrigger, HttpJobApi,
    UploadFile, WorkflowOrchestrator, WorkflowPhase, WorkflowState,
};

use args::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.json_logs);

    let print_metrics = args.print_metrics;
    let outcome = run(args).await;

    if print_metrics {
        match encode_metrics() {
            Ok(text) => println!("{}", text),
            Err(e) => warn!("Failed to encode metrics: {:#}", e),
        }
    }

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config_path();
    match &config_path {
        Some(path) => info!("Loading configuration from {:?}", path),
        None => info!("No configuration file, using defaults"),
    }
    let mut config = load_config_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    validate_config(&config).context("Configuration validation failed")?;

    let files = read_files(&args.files).await?;
    info!(
        "Submitting {} file(s) to {} as {}",
        files.len(),
        config.api.base_url,
        config.processing.output_format
    );

    let api = Arc::new(HttpJobApi::new(config.api.clone()).context("Failed to create API client")?);
    let orchestrator = WorkflowOrchestrator::new(
        config.workflow.clone(),
        config.polling.clone(),
        api.clone(),
        api.clone(),
        api.clone(),
    );
    spawn_progress_logger(&orchestrator);

    let job_id = tokio::select! {
        result = orchestrator.submit(files, config.processing.clone()) => {
            result.context("Failed to start processing")?
        }
        _ = signal::ctrl_c() => {
            orchestrator.cancel();
            bail!("Cancelled by user");
        }
    };
    info!("Processing job {}", job_id);

    let state = tokio::select! {
        state = orchestrator.wait_until_settled() => state,
        _ = signal::ctrl_c() => {
            orchestrator.cancel();
            bail!("Cancelled by user");
        }
    };

    report_file_errors(&state);

    match state.phase {
        WorkflowPhase::Completed => {
            let trigger = DownloadTrigger::new(api, config.download.output_dir.clone());
            let artifact = orchestrator
                .download(&trigger, config.processing.output_format)
                .await
                .context("Failed to download report")?;
            print_summary(&state, &artifact.path, &config);
            Ok(())
        }
        WorkflowPhase::Failed => match state.error {
            Some(e) => Err(e).context("Consolidation failed"),
            None => bail!("Consolidation failed"),
        },
        phase => bail!("Workflow ended unexpectedly in phase {}", phase),
    }
}

async fn read_files(paths: &[std::path::PathBuf]) -> Result<Vec<UploadFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file: {:?}", path))?;
        files.push(UploadFile::new(name, data));
    }
    Ok(files)
}

/// Log phase changes and progress until the orchestrator goes away.
fn spawn_progress_logger(orchestrator: &WorkflowOrchestrator) {
    let mut rx = orchestrator.subscribe();
    tokio::spawn(async move {
        let mut last = (WorkflowPhase::Idle, 0u8);
        while rx.changed().await.is_ok() {
            let (phase, progress, step) = {
                let state = rx.borrow_and_update();
                (
                    state.phase,
                    state.aggregate_progress,
                    state.current_step.clone(),
                )
            };
            if (phase, progress) == last {
                continue;
            }
            last = (phase, progress);
            if phase.is_active() {
                info!("[{:>3}%] {} - {}", progress, phase, step);
            }
        }
    });
}

fn report_file_errors(state: &WorkflowState) {
    for e in &state.errors {
        match e.line {
            Some(line) => warn!("{}:{}: {} ({})", e.file_name, line, e.message, e.code),
            None => warn!("{}: {} ({})", e.file_name, e.message, e.code),
        }
    }
}

fn print_summary(state: &WorkflowState, path: &Path, config: &Config) {
    println!("Report saved to {}", path.display());
    if let Some(result) = &state.result {
        if let Some(count) = result.invoice_count {
            println!("Invoices consolidated: {}", count);
        }
        if let Some(total) = result.total_amount {
            println!("Total amount: {:.2}", total);
        }
    }
    if !state.errors.is_empty() {
        println!(
            "{} file(s) could not be processed; see the warnings above",
            state.errors.len()
        );
    }
    info!(
        "Done ({} report, profile {})",
        config.processing.output_format, config.processing.column_profile
    );
}

fn encode_metrics() -> Result<String> {
    let registry = Registry::new();
    for metric in metrics::all_metrics() {
        registry.register(metric)?;
    }
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
