//! CLI command definitions for redink.
//!
//! The binary is an operational surface over the library: run the pipeline,
//! apply migrations, submit an essay from the terminal, poll status, and
//! repair or restart stuck work.

use std::fs;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gateway::ProviderGateway;
use crate::intake::EssayIntake;
use crate::notify::{LogNotifier, StatusNotifier};
use crate::scheduler::{CorrectionExecutor, CorrectionJob, JobQueue, Reaper, WorkerPool};
use crate::store::EssayStore;

/// Asynchronous essay correction pipeline.
#[derive(Parser)]
#[command(name = "redink")]
#[command(about = "Asynchronous AI essay correction pipeline")]
#[command(version)]
#[command(
    long_about = "redink accepts essay submissions, dispatches correction jobs through a \
Redis-backed queue, grades them via an AI provider gateway, and persists \
normalized results in PostgreSQL.\n\nExample usage:\n  redink migrate\n  \
redink run\n  redink submit --title 我的一天 --file essay.txt --source upload"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Apply database schema migrations.
    Migrate,

    /// Run the worker pool and reconciliation sweep until ctrl-c.
    Run,

    /// Submit an essay for correction.
    Submit(SubmitArgs),

    /// Show the status of an essay.
    Status(StatusArgs),

    /// Run one reconciliation sweep pass and exit.
    Sweep,

    /// Re-queue a failed essay for another correction run.
    Requeue(RequeueArgs),

    /// Re-run a completed essay; the old result is superseded on commit.
    Rerun(RerunArgs),
}

/// Arguments for `redink submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Essay title.
    #[arg(short, long)]
    pub title: String,

    /// Essay text given inline. Mutually exclusive with --file.
    #[arg(short, long, conflicts_with = "file")]
    pub content: Option<String>,

    /// Path to a UTF-8 text file containing the essay.
    #[arg(short, long)]
    pub file: Option<String>,

    /// Submission channel (text, upload, paste, api).
    #[arg(short, long, default_value = "text")]
    pub source: String,
}

/// Arguments for `redink status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Essay id to look up.
    pub essay_id: Uuid,
}

/// Arguments for `redink requeue`.
#[derive(Parser, Debug)]
pub struct RequeueArgs {
    /// Failed essay to restart.
    pub essay_id: Uuid,
}

/// Arguments for `redink rerun`.
#[derive(Parser, Debug)]
pub struct RerunArgs {
    /// Completed essay to grade again.
    pub essay_id: Uuid,
}

/// Parse CLI arguments without running a command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate => run_migrate_command().await,
        Commands::Run => run_pipeline_command().await,
        Commands::Submit(args) => run_submit_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Sweep => run_sweep_command().await,
        Commands::Requeue(args) => run_requeue_command(args).await,
        Commands::Rerun(args) => run_rerun_command(args).await,
    }
}

async fn run_migrate_command() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = EssayStore::connect(&config.database_url).await?;

    store.run_migrations().await?;
    info!("Migrations applied");
    Ok(())
}

async fn run_pipeline_command() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    let store = Arc::new(EssayStore::connect(&config.database_url).await?);
    store.run_migrations().await?;

    let queue = Arc::new(JobQueue::connect(&config.redis_url, &config.queue_name).await?);
    let gateway = Arc::new(ProviderGateway::from_config(&config.gateway));
    let notifier: Arc<dyn StatusNotifier> = Arc::new(LogNotifier::new());

    info!(
        provider = gateway.provider_id(),
        num_workers = config.num_workers,
        queue = %config.queue_name,
        "Starting correction pipeline"
    );

    let executor = Arc::new(CorrectionExecutor::new(
        Arc::clone(&store),
        gateway,
        Arc::clone(&queue),
        Arc::clone(&notifier),
        config.gateway.default_grade.clone(),
        config.retry_delay,
    ));

    let mut pool = WorkerPool::new(&config, Arc::clone(&queue), executor);
    pool.start().await?;

    let reaper = Reaper::new(&config, Arc::clone(&store), Arc::clone(&queue), notifier);
    let (shutdown_tx, _) = broadcast::channel(1);
    let reaper_rx = shutdown_tx.subscribe();
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    pool.shutdown().await?;
    reaper_handle.await?;

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        discarded = stats.jobs_discarded,
        requeued = stats.jobs_requeued,
        "Pipeline stopped"
    );

    Ok(())
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let content = match (args.content, args.file) {
        (Some(content), _) => content,
        (None, Some(path)) => fs::read_to_string(&path)?,
        (None, None) => anyhow::bail!("either --content or --file is required"),
    };

    let config = AppConfig::from_env()?;
    let store = Arc::new(EssayStore::connect(&config.database_url).await?);
    let queue = Arc::new(JobQueue::connect(&config.redis_url, &config.queue_name).await?);
    let notifier: Arc<dyn StatusNotifier> = Arc::new(LogNotifier::new());

    let intake = EssayIntake::new(store, queue, notifier, config.max_attempts);
    let receipt = intake.submit(&args.title, &content, &args.source).await?;

    println!("essay_id: {}", receipt.essay_id);
    println!("task_id:  {}", receipt.task_id);
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = EssayStore::connect(&config.database_url).await?;

    let report = store
        .get_status(args.essay_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("essay {} not found", args.essay_id))?;

    println!("essay_id: {}", report.essay_id);
    println!("status:   {}", report.status);
    if let Some(score) = report.score {
        println!("score:    {}", score);
    }
    if let Some(result) = &report.result {
        println!("result:\n{}", serde_json::to_string_pretty(result)?);
    }
    if let Some(error) = &report.error {
        println!("error:    {}", error);
    }
    Ok(())
}

async fn run_sweep_command() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = Arc::new(EssayStore::connect(&config.database_url).await?);
    let queue = Arc::new(JobQueue::connect(&config.redis_url, &config.queue_name).await?);
    let notifier: Arc<dyn StatusNotifier> = Arc::new(LogNotifier::new());

    let reaper = Reaper::new(&config, store, queue, notifier);
    let report = reaper.sweep_once().await?;

    println!("promoted:     {}", report.promoted);
    println!("reset_stale:  {}", report.reset_stale);
    println!("redispatched: {}", report.redispatched);
    println!("failed:       {}", report.failed);
    Ok(())
}

async fn run_requeue_command(args: RequeueArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = Arc::new(EssayStore::connect(&config.database_url).await?);
    let queue = Arc::new(JobQueue::connect(&config.redis_url, &config.queue_name).await?);

    let new_task_id = Uuid::new_v4();
    if !store.requeue_failed(args.essay_id, new_task_id).await? {
        anyhow::bail!("essay {} is not in the failed state", args.essay_id);
    }

    let job =
        CorrectionJob::new(args.essay_id, new_task_id).with_max_attempts(config.max_attempts);
    queue.enqueue(&job).await?;

    println!("essay {} requeued (task {})", args.essay_id, new_task_id);
    Ok(())
}

async fn run_rerun_command(args: RerunArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = Arc::new(EssayStore::connect(&config.database_url).await?);
    let queue = Arc::new(JobQueue::connect(&config.redis_url, &config.queue_name).await?);

    // The completed correction row stays authoritative until the new
    // attempt commits, at which point the commit marks it superseded.
    let new_task_id = Uuid::new_v4();
    if !store.rerun_completed(args.essay_id, new_task_id).await? {
        anyhow::bail!("essay {} is not in the completed state", args.essay_id);
    }

    let job =
        CorrectionJob::new(args.essay_id, new_task_id).with_max_attempts(config.max_attempts);
    queue.enqueue(&job).await?;

    println!("essay {} re-running (task {})", args.essay_id, new_task_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_args_parse() {
        let cli = Cli::parse_from([
            "redink", "submit", "--title", "我的一天", "--content", "这是作文", "--source",
            "paste",
        ]);
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.title, "我的一天");
                assert_eq!(args.content.as_deref(), Some("这是作文"));
                assert_eq!(args.source, "paste");
                assert!(args.file.is_none());
            }
            _ => panic!("expected submit command"),
        }
    }

    #[test]
    fn test_status_args_parse() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["redink", "status", &id.to_string()]);
        match cli.command {
            Commands::Status(args) => assert_eq!(args.essay_id, id),
            _ => panic!("expected status command"),
        }
    }

    #[test]
    fn test_rerun_args_parse() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["redink", "rerun", &id.to_string()]);
        match cli.command {
            Commands::Rerun(args) => assert_eq!(args.essay_id, id),
            _ => panic!("expected rerun command"),
        }
    }

    #[test]
    fn test_content_and_file_conflict() {
        let result = Cli::try_parse_from([
            "redink", "submit", "--title", "t", "--content", "c", "--file", "essay.txt",
        ]);
        assert!(result.is_err());
    }
}
