//! cluster-admin: schema migration and data repair for the cluster database.
//!
//! Reads configuration from the environment (and `.env`), see
//! `cluster_core::config` for the variable list.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cluster_db::{log_pool_metrics, AppConfig, CleanupReport, Database, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "cluster-admin")]
#[command(author, version, about = "Administration tasks for the cluster database")]
#[command(propagate_version = true)]
struct Cli {
    /// Override DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Remove placeholder file references and the rows left dangling by them
    Cleanup,

    /// Delete canvas nodes whose annotation was soft-deleted
    PurgeCanvasOrphans,
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cluster_db=info,cluster_core=info,cluster_admin=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    match &config.file {
        Some(path) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("cluster-admin.log");
            let file_appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            match config.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init(),
                LogFormat::Text => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(writer),
                    )
                    .init(),
            }
            Some(guard)
        }
        None => {
            match config.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init(),
                LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
            }
            None
        }
    }
}

fn print_report(report: &CleanupReport) {
    println!("malformed file refs:      {}", report.malformed_file_refs);
    println!("malformed targets:        {}", report.malformed_targets);
    println!("targetless annotations:   {}", report.targetless_annotations);
    println!("orphan tag links:         {}", report.orphan_tag_links);
    println!("orphan file views:        {}", report.orphan_file_views);
    println!("orphan canvas nodes:      {}", report.orphan_canvas_nodes);
    println!("total:                    {}", report.total());
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.database_url {
        Some(url) => AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some(url.clone()),
            _ => std::env::var(key).ok(),
        }),
        None => AppConfig::from_env(),
    }
    .context("loading configuration")?;
    let _guard = init_logging(&config.logging);

    info!(
        log_format = %config.logging.format,
        log_file = config
            .logging
            .file
            .as_deref()
            .and_then(|p| p.to_str())
            .unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let db = Database::from_config(&config)
        .await
        .context("connecting to database")?;
    log_pool_metrics(db.pool());

    match cli.command {
        Commands::Migrate => {
            db.migrate().await.context("running migrations")?;
            info!(subsystem = "admin", op = "migrate", "Migrations applied");
            println!("Migrations applied");
        }
        Commands::Cleanup => {
            let report = db
                .maintenance
                .cleanup_malformed()
                .await
                .context("cleaning up malformed data")?;
            print_report(&report);
        }
        Commands::PurgeCanvasOrphans => {
            let report = db
                .maintenance
                .purge_orphaned_canvas_nodes()
                .await
                .context("purging orphaned canvas nodes")?;
            print_report(&report);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
