//! Video stitching worker binary.
//!
//! Usage: `stitch-worker <job.json>`. Prints the job report (or failure)
//! as JSON on stdout and exits non-zero when the job fails.

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stitch_models::JobRequest;
use stitch_worker::{JobExecutor, PipelineConfig};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("stitch=info".parse()?)
        .add_directive("aws_config=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?);

    // Logs go to stderr; stdout carries the job result.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn read_request(path: &str) -> anyhow::Result<JobRequest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read job file {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid job file {}", path))
}

async fn run() -> anyhow::Result<bool> {
    let path = std::env::args()
        .nth(1)
        .context("Usage: stitch-worker <job.json>")?;
    let request = read_request(&path).await?;

    let config = PipelineConfig::from_env();
    info!("Worker config: {:?}", config);

    let executor = JobExecutor::new(config)
        .await
        .context("Failed to create job executor")?;
    let sweeper = executor.start_sweeper();

    let result = tokio::select! {
        result = executor.execute(&request) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
    };

    executor.shutdown();
    if let Some(handle) = sweeper {
        handle.await.ok();
    }

    match result {
        Some(Ok(report)) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        Some(Err(failure)) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(false)
        }
        None => Ok(false),
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting stitch-worker");

    match run().await {
        Ok(true) => info!("Worker shutdown complete"),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
