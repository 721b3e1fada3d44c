use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bkjobs::config::{AppConfig, DEFAULT_CONFIG_PATH};
use bkjobs::context::AppContext;
use bkjobs::core::{
    BackupType, Engine, EngineResources, EngineSettings, RunHandle, RunOutcome, StateFileObserver,
};
use bkjobs::db::{self, SqliteJobStore};
use bkjobs::logging::{self, LogConfig};
use bkjobs::rpc::{Request, RpcClient, RpcServer};
use bkjobs::selection::Selection;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bkjobs")]
#[command(about = "Backup job runner with remote control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the remote control until Ctrl-C
    Daemon,
    /// Run jobs in the foreground: `all`, `2`, `1-3` or `1-3;5`
    Run { selection: Selection },
    List,
    Add(AddArgs),
    /// Remove the job at a 1-based position
    Remove { position: usize },
    /// Talk to a running daemon
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
        /// Daemon address, defaults to `rpc_bind`
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Write the effective configuration to a file
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    target: PathBuf,
    #[arg(long = "type", default_value = "full")]
    backup_type: BackupType,
}

#[derive(Subcommand)]
enum RemoteCommand {
    List,
    Status,
    /// Start every job, or one by id or 1-based position
    Execute {
        #[arg(long, conflicts_with = "index")]
        job_id: Option<Uuid>,
        #[arg(long)]
        index: Option<usize>,
    },
    Pause { job_id: Uuid },
    Resume { job_id: Uuid },
    Stop { job_id: Uuid },
}

/// CLI values layered over the config file and environment.
#[derive(Args, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    rpc_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    database_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    log_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    max_concurrent_jobs: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::new(cli.config.as_deref(), Some(&cli.overrides))?;
    logging::init(LogConfig::from(&config));

    match cli.command {
        Commands::Daemon => run_daemon(config).await.context("Daemon failed")?,
        Commands::Run { selection } => run_jobs(config, selection).await?,
        Commands::List => list_jobs(config).await?,
        Commands::Add(args) => add_job(config, args).await?,
        Commands::Remove { position } => remove_job(config, position).await?,
        Commands::Remote { command, addr } => {
            remote(addr.unwrap_or(config.rpc_bind), command).await?
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.write_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

async fn open_engine(config: &AppConfig) -> Result<Engine> {
    let settings = EngineSettings::from_config(config)?;
    let resources = EngineResources::from_config(config);

    let conn = db::init(&config.database_path)
        .await
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let store = Arc::new(SqliteJobStore::new(conn));

    let engine = Engine::load(settings, resources, store).await?;
    if let Some(path) = &config.state_file {
        engine.add_observer(Arc::new(StateFileObserver::new(path)));
    }
    Ok(engine)
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let bind = config.rpc_bind;
    let ctx = AppContext::new(config, engine.clone());

    let server = Arc::new(RpcServer::bind(ctx, bind).await?);
    let serve = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping jobs");

    for job in engine.list_jobs() {
        if engine.is_running(job.id) {
            engine.stop_job(job.id)?;
        }
    }
    server.shutdown();
    serve.await??;

    Ok(())
}

async fn run_jobs(config: AppConfig, selection: Selection) -> Result<()> {
    let engine = open_engine(&config).await?;

    let handle = match selection {
        Selection::All => engine.execute_all(),
        Selection::Indices(indices) => {
            let mut runs = Vec::new();
            for index in indices {
                runs.push(engine.execute_by_index(index)?);
            }
            RunHandle::merge(runs)
        }
    };

    if handle.is_empty() {
        println!("No jobs to run");
        return Ok(());
    }

    let mut failed = false;
    for report in handle.join().await {
        let outcome = match &report.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Stopped => "stopped".to_string(),
            RunOutcome::Interrupted => "interrupted by business software".to_string(),
            RunOutcome::Aborted(reason) => {
                failed = true;
                format!("failed: {reason}")
            }
        };
        println!(
            "{}: {} ({} files, {} errors)",
            report.job_name, outcome, report.files_processed, report.files_failed
        );
    }

    if failed {
        anyhow::bail!("One or more jobs failed");
    }
    Ok(())
}

async fn list_jobs(config: AppConfig) -> Result<()> {
    let engine = open_engine(&config).await?;
    let jobs = engine.list_jobs();
    if jobs.is_empty() {
        println!("No jobs configured");
    }
    for (position, job) in jobs.iter().enumerate() {
        println!(
            "{:>3}. {} [{}] {} -> {}",
            position + 1,
            job.name,
            job.backup_type,
            job.source.display(),
            job.target.display()
        );
    }
    Ok(())
}

async fn add_job(config: AppConfig, args: AddArgs) -> Result<()> {
    let engine = open_engine(&config).await?;
    let job = engine
        .add_job(args.name, args.source, args.target, args.backup_type)
        .await?;
    println!("Added job '{}' ({})", job.name, job.id);
    Ok(())
}

async fn remove_job(config: AppConfig, position: usize) -> Result<()> {
    let engine = open_engine(&config).await?;
    let job = position
        .checked_sub(1)
        .and_then(|i| engine.list_jobs().into_iter().nth(i))
        .with_context(|| format!("No job at position {position}"))?;

    let removed = engine.remove_job(job.id).await?;
    println!("Removed job '{}'", removed.name);
    Ok(())
}

async fn remote(addr: SocketAddr, command: RemoteCommand) -> Result<()> {
    let request = match command {
        RemoteCommand::List => Request::new("list"),
        RemoteCommand::Status => Request::new("status"),
        RemoteCommand::Execute { job_id, index } => match (job_id, index) {
            (Some(id), _) => Request::with_parameters("execute", json!({ "jobId": id })),
            (None, Some(index)) => Request::with_parameters("execute", json!({ "index": index })),
            (None, None) => Request::new("execute"),
        },
        RemoteCommand::Pause { job_id } => {
            Request::with_parameters("pause", json!({ "jobId": job_id }))
        }
        RemoteCommand::Resume { job_id } => {
            Request::with_parameters("resume", json!({ "jobId": job_id }))
        }
        RemoteCommand::Stop { job_id } => {
            Request::with_parameters("stop", json!({ "jobId": job_id }))
        }
    };

    let answer = RpcClient::new(addr).send(&request).await?;
    match answer {
        serde_json::Value::String(message) => println!("{message}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
