//! Shelter CLI: operator entry points for the backup engine.
//!
//! Configuration comes from the environment (or `.env`), see `shelter_core::Config`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use shelter_cli::{init_tracing, AppContext};
use shelter_core::models::{ProviderKind, TracingLog};
use shelter_core::Config;
use shelter_storage::{RestorePipeline, RetentionRotator};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "shelter", about = "Backup and restore for the application database and uploads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup now
    Backup {
        /// Mirror directory, overrides the backup_path setting
        #[arg(long)]
        external: Option<PathBuf>,
    },
    /// Restore the database and uploads from a packaged run or run directory
    Restore {
        /// Path to `<run>.zip` or a run directory
        archive: PathBuf,
    },
    /// Apply retention to the backup directory
    Rotate {
        /// Number of artifacts to keep (defaults to SHELTER_KEEP_COUNT)
        #[arg(long)]
        keep: Option<usize>,
        /// Directory to rotate (defaults to the backup root)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the provider consent URL
    AuthUrl {
        /// onedrive or gdrive
        provider: ProviderKind,
        #[arg(long)]
        redirect_uri: String,
    },
    /// Exchange an authorization code and store the provider tokens
    Connect {
        /// onedrive or gdrive
        provider: ProviderKind,
        #[arg(long)]
        code: String,
        #[arg(long)]
        redirect_uri: String,
    },
    /// Show recent backup runs
    History {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Keep the backup schedule armed until interrupted
    Daemon,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Restore { archive } => {
            let report = RestorePipeline::new(config.paths.clone())
                .restore(&archive, &mut TracingLog)
                .await?;
            print_json(&json!({
                "database_restored": report.database_restored,
                "backup_of_previous": report.backup_of_previous,
                "uploads_restored": report.uploads_restored,
                "uploads_files": report.uploads_files,
            }))?;
        }
        Commands::Rotate { keep, root } => {
            let root = root.unwrap_or_else(|| config.paths.backup_root.clone());
            let report = RetentionRotator::new(root)
                .rotate(keep.unwrap_or(config.keep_count).max(1), &mut TracingLog)
                .await?;
            print_json(&json!({
                "kept": report.kept,
                "deleted": report.deleted,
                "failed": report.failed,
            }))?;
        }
        Commands::Backup { external } => {
            let ctx = AppContext::from_config(config).await?;
            let run = ctx.orchestrator.run(external).await;
            print_json(&run)?;
        }
        Commands::AuthUrl {
            provider,
            redirect_uri,
        } => {
            let ctx = AppContext::from_config(config).await?;
            let url = ctx.provider(provider)?.get_auth_url(&redirect_uri).await?;
            print_json(&json!({ "provider": provider, "auth_url": url }))?;
        }
        Commands::Connect {
            provider,
            code,
            redirect_uri,
        } => {
            let ctx = AppContext::from_config(config).await?;
            let tokens = ctx.provider(provider)?.connect(&code, &redirect_uri).await?;
            print_json(&json!({
                "provider": provider,
                "connected": true,
                "refresh_token_stored": tokens.refresh_token.is_some(),
                "expires_in": tokens.expires_in,
            }))?;
        }
        Commands::History { limit } => {
            let ctx = AppContext::from_config(config).await?;
            let entries = ctx.log_sink.recent(limit).await?;
            print_json(&entries)?;
        }
        Commands::Daemon => {
            let ctx = AppContext::from_config(config).await?;
            run_daemon(ctx).await?;
        }
    }

    Ok(())
}

async fn run_daemon(ctx: AppContext) -> anyhow::Result<()> {
    let controller = ctx.schedule_controller();
    let frequency = controller.reschedule().await?;
    tracing::info!(
        frequency = %frequency,
        next_fire = ?controller.next_fire_time().await,
        "Backup daemon started"
    );

    let shutdown = CancellationToken::new();
    let poll = Duration::from_secs(ctx.config.schedule_poll_secs.max(1));
    let watcher = tokio::spawn(controller.watch(poll, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    watcher.await.context("Schedule watcher panicked")?;
    Ok(())
}
