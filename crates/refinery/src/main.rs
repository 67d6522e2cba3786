use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use refinery::config::{default_database_path, load_config, Config};
use refinery::logging::init_logging;
use refinery::{EngineKind, JobStatus, Orchestrator};

#[derive(Parser)]
#[command(
    name = "refinery",
    version,
    about = "Clean tabular datasets and keep an audit of what changed"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON or YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a dataset, process it, and print the finished job
    Process {
        /// CSV or spreadsheet to clean
        file: PathBuf,
        /// Engine to run (standard or premium)
        #[arg(long, default_value = "standard")]
        engine: EngineKind,
        /// Owner recorded on the job
        #[arg(long, default_value = "local")]
        owner: String,
        /// Seconds to wait for the job to finish
        #[arg(long, default_value_t = 600)]
        wait: u64,
    },
    /// List jobs for an owner, newest first
    List {
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Delete a job and its artifacts
    Delete {
        job_id: String,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Copy the cleaned output of a completed job into a directory
    Download {
        job_id: String,
        dest_dir: PathBuf,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Mark jobs left unfinished by a crashed process as failed. Only run this
    /// when no other refinery process is using the database.
    Recover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.json_logs);

    let config = build_config(cli.config.as_deref())?;
    let orchestrator = Orchestrator::from_config(config).context("failed to start orchestrator")?;

    let outcome = run_command(&orchestrator, cli.command).await;
    orchestrator.shutdown().await;
    outcome
}

fn build_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();

    // The CLI is one process per command, so jobs must outlive it.
    if config.database_path.is_none() {
        config.database_path = Some(default_database_path());
    }
    Ok(config)
}

async fn run_command(orchestrator: &Orchestrator, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Process {
            file,
            engine,
            owner,
            wait,
        } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let original_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("input path has no file name")?;

            let job = orchestrator.upload(&owner, original_name, &content, engine)?;
            eprintln!("Submitted job {}", job.id);

            let job = orchestrator
                .wait_for_terminal(&job.id, Duration::from_secs(wait))
                .await?;
            println!("{}", serde_json::to_string_pretty(&job)?);

            match job.status {
                JobStatus::Completed => Ok(()),
                JobStatus::Failed => bail!("job {} failed", job.id),
                status => bail!("job {} still {} after {}s", job.id, status, wait),
            }
        }
        Commands::List { owner } => {
            let jobs = orchestrator.list_jobs(&owner);
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        Commands::Delete { job_id, owner } => {
            let removed = orchestrator.delete_job(&owner, &job_id)?;
            println!("Deleted job {} ({} artifacts removed)", job_id, removed.len());
            Ok(())
        }
        Commands::Download {
            job_id,
            dest_dir,
            owner,
        } => {
            let download = orchestrator.download(&owner, &job_id)?;
            tokio::fs::create_dir_all(&dest_dir)
                .await
                .with_context(|| format!("failed to create {}", dest_dir.display()))?;
            let target = dest_dir.join(&download.filename);
            tokio::fs::copy(&download.path, &target)
                .await
                .with_context(|| format!("failed to copy to {}", target.display()))?;
            println!("{}", target.display());
            Ok(())
        }
        Commands::Recover => {
            let recovered = orchestrator.recover_interrupted();
            println!("Marked {} interrupted jobs as failed", recovered);
            Ok(())
        }
    }
}
