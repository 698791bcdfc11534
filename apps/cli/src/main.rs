//! Feltflow CLI - runs federated training over compute-to-data jobs.
//!
//! A run is either looked up in the job store by launch token, or defined on
//! the command line and registered under a fresh launch token.

mod config;

use anyhow::{bail, Context};
use clap::Parser;
use config::{FlowConfig, DEFAULT_API_ENDPOINT, DEFAULT_CHAIN_ID};
use feltflow_abstraction::{AlgorithmAssets, AlgorithmConfig, JobRecord, JobStore, WalletSigner};
use feltflow_clients::{HttpAssetResolver, HttpComputeProvider, HttpJobStore, HttpSubgraphClient, HttpWalletGateway};
use feltflow_core::{ComputeContext, FederatedTraining, PollOptions, TrainingSetup};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// FELT Labs - federated learning on compute-to-data marketplaces
#[derive(Parser, Debug)]
#[command(name = "felt-flow", author, version, about)]
struct Args {
    /// Launch token of a run registered in the job store
    #[arg(long, conflicts_with_all = ["datasets", "name"], required_unless_present = "datasets")]
    launch_token: Option<String>,

    /// Dataset DID to train on (repeat for federated runs)
    #[arg(long = "dataset", value_name = "DID", requires = "training_algorithm")]
    datasets: Vec<String>,

    /// Name of a run defined on the command line
    #[arg(long, default_value = "felt-flow training")]
    name: String,

    /// Chain of a run defined on the command line
    #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
    chain_id: u64,

    /// Local training algorithm DID
    #[arg(long, value_name = "DID")]
    training_algorithm: Option<String>,

    /// Aggregation algorithm DID (required with more than one dataset)
    #[arg(long, value_name = "DID")]
    aggregation_algorithm: Option<String>,

    /// Placeholder dataset DID for aggregation jobs
    #[arg(long, value_name = "DID")]
    empty_dataset: Option<String>,

    /// Public key auth tokens are sealed for before being stored
    #[arg(long)]
    public_key: Option<String>,

    /// Custom data passed to the algorithm, as a JSON object
    #[arg(long, value_parser = parse_json_object)]
    algocustomdata: Option<Value>,

    /// API endpoint URL for storing jobs data
    #[arg(long)]
    api_endpoint: Option<String>,

    /// Wallet gateway URL (overrides the network config)
    #[arg(long)]
    gateway: Option<String>,

    /// Additional configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of training rounds
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Seconds between job status polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds to wait for a batch of jobs before giving up
    #[arg(long)]
    poll_deadline: Option<u64>,

    /// Write the final model to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn parse_json_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl Args {
    /// The run described by command-line flags.
    fn explicit_record(&self) -> anyhow::Result<JobRecord> {
        let Some(training) = self.training_algorithm.clone() else {
            bail!("--training-algorithm is required when datasets are given");
        };
        if self.datasets.len() > 1 && (self.aggregation_algorithm.is_none() || self.empty_dataset.is_none()) {
            bail!("--aggregation-algorithm and --empty-dataset are required with more than one dataset");
        }

        Ok(JobRecord {
            launch_token: None,
            job_id: None,
            name: self.name.clone(),
            chain_id: self.chain_id,
            data_dids: self.datasets.clone(),
            algo_config: AlgorithmConfig {
                assets: AlgorithmAssets {
                    training,
                    aggregation: self.aggregation_algorithm.clone().unwrap_or_default(),
                    empty_dataset: self.empty_dataset.clone().unwrap_or_default(),
                },
            },
            algo_custom_data: self.algocustomdata.clone().unwrap_or(Value::Null),
            public_key: self.public_key.clone(),
            status: None,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = FlowConfig::discover_and_load(args.config.as_deref()).context("Failed to load configuration")?;

    let level = args.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info");
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(level))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let api_endpoint = args.api_endpoint.clone().or_else(|| config.api_endpoint.clone());
    let api_endpoint = api_endpoint.unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string());
    let store = Arc::new(HttpJobStore::new(&api_endpoint));

    let (launch_token, mut record) = match &args.launch_token {
        Some(token) => {
            let record = store
                .get(token)
                .await
                .with_context(|| format!("Failed to fetch job {token} from job store at {api_endpoint}"))?;
            if record.is_started() {
                bail!("Job with launch token {token} was already started.");
            }
            (token.clone(), record)
        }
        None => {
            let record = args.explicit_record()?;
            let token = uuid::Uuid::new_v4().to_string();
            // Fail on missing network settings before registering the run.
            if config.network(record.chain_id).is_none() {
                bail!("No network configured for chain {}", record.chain_id);
            }
            store
                .create(&token, &record)
                .await
                .with_context(|| format!("Failed to register job in job store at {api_endpoint}"))?;
            info!(launch_token = %token, "Registered training run");
            (token, record)
        }
    };
    if let Some(custom) = &args.algocustomdata {
        record.algo_custom_data = custom.clone();
    }

    let chain_id = record.chain_id;
    let Some(network) = config.network(chain_id) else {
        bail!("No network configured for chain {chain_id}");
    };
    let Some(gateway_url) = args.gateway.as_deref().or(network.gateway_url.as_deref()) else {
        bail!("No wallet gateway configured for chain {chain_id}; pass --gateway or set networks.{chain_id}.gateway_url");
    };
    let (Some(subgraph_url), Some(metadata_url)) = (&network.subgraph_url, &network.metadata_cache_url) else {
        bail!("Network {chain_id} needs both subgraph_url and metadata_cache_url");
    };

    let gateway = Arc::new(
        HttpWalletGateway::connect(gateway_url)
            .await
            .with_context(|| format!("Failed to connect to wallet gateway at {gateway_url}"))?,
    );

    println!("FELT Labs: Starting training");
    println!("  Chain ID: {chain_id}");
    println!("  Using account: {}", gateway.address());

    let ctx = ComputeContext {
        chain_id,
        assets: Arc::new(HttpAssetResolver::new(metadata_url)),
        provider: Arc::new(HttpComputeProvider::new()),
        market: gateway.clone(),
        subgraph: Arc::new(HttpSubgraphClient::new(subgraph_url)),
        consume_market_fee: None,
    };

    let cancel = CancellationToken::new();
    let mut poll = PollOptions::default().with_cancel(cancel.clone());
    if let Some(secs) = args.poll_interval.or(config.poll_interval_secs) {
        poll = poll.with_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = args.poll_deadline.or(config.poll_deadline_secs) {
        poll = poll.with_deadline(Duration::from_secs(secs));
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current poll");
            cancel.cancel();
        }
    });

    let setup = TrainingSetup::from_record(launch_token, &record);
    let mut training = FederatedTraining::new(ctx, store, gateway.clone(), setup)
        .await
        .context("Failed to prepare training")?
        .with_poll_options(poll);

    let iterations = args.iterations.or(config.iterations).unwrap_or(1);
    training.run(gateway.as_ref(), iterations).await.context("Training failed")?;

    let model = training.latest_model(gateway.as_ref()).await.context("Failed to fetch final model")?;
    let rendered = serde_json::to_string_pretty(&model)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write model to {}", path.display()))?;
            println!("Final model written to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    println!("Training finished! View the results at: {api_endpoint}/jobs");
    Ok(())
}
