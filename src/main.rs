mod cli;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use casework::storage::{CopyStorage, DurableStorage, InPlaceStorage};
use casework::{
    CaseworkConfig, Evidence, ExecutionEngine, JobRegistry, Pipeline, PipelineOptions,
    TokioProcessRunner,
};
use clap::Parser;
use cli::{Cli, Command, EvidenceArg};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ui::PipelineProgress;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// Logs go to stderr so `--json` output stays parseable. RUST_LOG wins over --verbose.
fn init_tracing(verbose: bool) {
    let default = if verbose { "casework=debug" } else { "casework=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => CaseworkConfig::load_from(path)?,
        None => CaseworkConfig::load()?,
    };

    match cli.command {
        Command::Jobs => {
            let registry = JobRegistry::from_config(&config)?;
            ui::print_jobs(&registry);
            Ok(ExitCode::SUCCESS)
        }
        Command::Process {
            path,
            kind,
            jobs,
            timeout,
            max_tasks,
            output_dir,
            json,
        } => {
            if !jobs.is_empty() {
                config.jobs.enabled = jobs;
            }
            if let Some(secs) = timeout {
                config.task_timeout_secs = secs;
            }
            if let Some(n) = max_tasks {
                config.max_concurrent_tasks = n;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            config.validate()?;
            process(&config, path, kind, json).await
        }
    }
}

async fn process(
    config: &CaseworkConfig,
    path: PathBuf,
    kind: EvidenceArg,
    json: bool,
) -> Result<ExitCode> {
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("evidence not found: {}", path.display()))?;
    let registry = JobRegistry::from_config(config)?;

    let storage: Arc<dyn DurableStorage> = match &config.storage_dir {
        Some(dir) => Arc::new(CopyStorage::new(dir)),
        None => Arc::new(InPlaceStorage),
    };
    let engine = ExecutionEngine::new(TokioProcessRunner::new(config.task_timeout()), storage);
    let pipeline = Pipeline::new(registry, engine, PipelineOptions::from(config));

    let root = Evidence::root(kind.into(), Some(path.clone()));
    info!(evidence_id = %root.id, path = %path.display(), kind = %root.kind, "processing evidence");

    let mut progress = PipelineProgress::start(&path, json);
    let report = pipeline
        .process_observed(vec![root], |result| progress.task_finished(result))
        .await?;

    let mut clean = report.is_clean();
    if let Err(violation) = report.verify_provenance() {
        error!(error = %violation, "provenance check failed");
        clean = false;
    }

    let report_path = report
        .write_json(&config.output_dir)
        .context("failed to write report")?;
    progress.finish(&report, &report_path);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
