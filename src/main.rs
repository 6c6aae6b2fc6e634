//! SOAP client binary.
//!
//! Run with: `zentinel-soap-client request --params request.yaml`
//!
//! Parameters are read as YAML (JSON is accepted too). The result mapping is
//! printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_client::{BatchParams, ClientConfig, RequestParams, SoapClient, ValidateParams};

/// SOAP client.
///
/// Sends SOAP requests, runs batches and checks endpoints.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to client configuration file (YAML)
    #[arg(short, long, default_value = "soap-client.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one SOAP request
    Request {
        /// Request parameters (YAML or JSON)
        #[arg(short, long)]
        params: PathBuf,
    },
    /// Send a batch of SOAP requests
    Batch {
        /// Batch parameters (YAML or JSON)
        #[arg(short, long)]
        params: PathBuf,
    },
    /// Validate an endpoint
    Validate {
        /// Validation parameters (YAML or JSON)
        #[arg(short, long)]
        params: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting SOAP client v{}", env!("CARGO_PKG_VERSION"));

    let config = if args.config.exists() {
        info!("Config file: {}", args.config.display());
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        ClientConfig::default()
    };

    info!(
        timeout_secs = config.transport.timeout_secs,
        max_retries = config.transport.max_retries,
        cache_ttl_secs = config.cache.ttl_secs,
        "Configuration loaded"
    );

    let client = SoapClient::new(config);

    let run = async {
        let result = match &args.command {
            Command::Request { params } => {
                let params: RequestParams = load_params(params).await?;
                client.run_request(params).await
            }
            Command::Batch { params } => {
                let params: BatchParams = load_params(params).await?;
                client.run_batch(params).await
            }
            Command::Validate { params } => {
                let params: ValidateParams = load_params(params).await?;
                client.run_validate(params).await
            }
        };
        Ok::<Value, anyhow::Error>(result)
    };

    let result = tokio::select! {
        result = run => result?,
        _ = signal::ctrl_c() => {
            anyhow::bail!("Interrupted");
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to render result")?
    );

    let stats = client.stats();
    info!(
        sent = stats.requests_sent,
        succeeded = stats.requests_succeeded,
        failed = stats.requests_failed,
        "SOAP client finished"
    );

    if result["failed"].as_bool().unwrap_or(false) {
        std::process::exit(1);
    }
    Ok(())
}

async fn load_params<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read parameters from {}", path.display()))?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse parameters from {}", path.display()))
}
