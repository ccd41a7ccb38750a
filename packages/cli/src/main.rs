//! trainq: operator CLI for the training-job orchestrator.
//!
//! Every command boots the orchestrator from the environment (`DB_*`,
//! `STORAGE_*`, `TRAINER_*`, `TRAINQ_*`), runs one lifecycle operation and
//! prints the result as JSON.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use orchestrator::OrchestratorConfig;
use tracing_subscriber::EnvFilter;

mod commands;

/// Training-job orchestrator
#[derive(Parser)]
#[command(name = "trainq")]
#[command(about = "Submit, inspect and manage model training jobs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of concurrent training slots
    #[arg(long, global = true, env = "TRAINQ_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Database endpoint ("mem://", "rocksdb://path")
    #[arg(long, global = true, env = "DB_ENDPOINT")]
    db_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DatasetSource {
    /// Local dataset file to upload
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Ref of a dataset already in artifact storage
    #[arg(long)]
    dataset_ref: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job and wait for its training run
    Submit {
        #[command(flatten)]
        source: DatasetSource,

        /// What the model should learn (10 to 1000 characters)
        #[arg(short, long)]
        description: String,
    },

    /// Print a job's id and status
    Status { id: String },

    /// Print a job's full record
    Show { id: String },

    /// List jobs, newest first
    List {
        /// Only jobs with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Only jobs created at or after this date (ISO 8601)
        #[arg(long)]
        after: Option<String>,

        /// Only jobs created at or before this date (ISO 8601)
        #[arg(long)]
        before: Option<String>,

        #[arg(short, long, default_value = "1")]
        page: u32,

        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Replace a job's description, optionally retraining
    Update {
        id: String,

        /// New description (10 to 1000 characters)
        #[arg(short, long)]
        description: String,

        /// Queue a new training run and wait for it
        #[arg(short, long)]
        retrain: bool,
    },

    /// Delete a job and its artifacts
    Delete { id: String },

    /// Mark jobs interrupted by a previous process as failed
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = OrchestratorConfig::from_env()?;
    if let Some(concurrency) = cli.concurrency {
        config.pool = config.pool.with_concurrency(concurrency);
    }
    if let Some(endpoint) = cli.db_endpoint {
        config.db.endpoint = endpoint;
    }

    let manager = orchestrator::bootstrap(config).await?;

    let result = match cli.command {
        Commands::Submit {
            source,
            description,
        } => commands::submit(&manager, source.file, source.dataset_ref, &description).await,
        Commands::Status { id } => commands::status(&manager, &id).await,
        Commands::Show { id } => commands::show(&manager, &id).await,
        Commands::List {
            status,
            after,
            before,
            page,
            limit,
        } => {
            let filter =
                commands::build_filter(status.as_deref(), after.as_deref(), before.as_deref())?;
            commands::list(&manager, filter, page, limit).await
        }
        Commands::Update {
            id,
            description,
            retrain,
        } => commands::update(&manager, &id, &description, retrain).await,
        Commands::Delete { id } => commands::delete(&manager, &id).await,
        Commands::Recover => commands::recover(&manager).await,
    };

    manager.shutdown().await;
    result
}
