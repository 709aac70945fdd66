use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmir_client::PortalClient;
use pmir_sync::{connect_pool, run_migrations, staff_engine, task_engine, SyncConfig};
use pmir_web::{AppState, LiveProbe};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PIPELINE_STAGGER: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "pmir-cli")]
#[command(about = "Portal mirror command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply migrations, then run the health endpoint and both sync pipelines.
    Run,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Serve only the health endpoint.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PMIR_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// SIGINT for a terminal, SIGTERM for docker/systemd; either one cancels.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, listening for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        info!("shutdown signal received");
        trigger.cancel();
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Migrate => {
            let pool = connect_pool(&config.database_url).await?;
            run_migrations(&pool).await?;
            info!("migrations applied");
            Ok(())
        }
        Commands::Serve => {
            let pool = connect_pool(&config.database_url).await?;
            let probe = LiveProbe::new(pool, config.portal_base_url.clone())?;
            let cancel = shutdown_token();
            pmir_web::serve(config.web_port, AppState::new(Arc::new(probe)), cancel).await
        }
    }
}

async fn run(config: SyncConfig) -> Result<()> {
    let pool = connect_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let client =
        Arc::new(PortalClient::new(config.portal_config()).context("building portal client")?);
    let cancel = shutdown_token();
    let mut workers = JoinSet::new();

    let probe = LiveProbe::new(pool.clone(), config.portal_base_url.clone())?;
    {
        let cancel = cancel.clone();
        let port = config.web_port;
        workers
            .spawn(async move { pmir_web::serve(port, AppState::new(Arc::new(probe)), cancel).await });
    }

    let staff = staff_engine(&config, client.clone(), pool.clone());
    {
        let cancel = cancel.clone();
        workers.spawn(async move { staff.run(cancel).await });
    }

    // Both pipelines log in to the same portal; the stagger keeps the two
    // logins from racing over the shared session cookie.
    tokio::time::sleep(PIPELINE_STAGGER).await;

    let tasks = task_engine(&config, client, pool);
    {
        let cancel = cancel.clone();
        workers.spawn(async move { tasks.run(cancel).await });
    }

    let mut failure: Option<anyhow::Error> = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "worker failed, shutting down");
                cancel.cancel();
                failure.get_or_insert(err);
            }
            Err(err) => {
                error!(error = %err, "worker panicked, shutting down");
                cancel.cancel();
                failure.get_or_insert(anyhow::Error::new(err));
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
