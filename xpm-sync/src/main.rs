//! xpm-sync - experiment status synchronization service
//!
//! Serves the experiment API and runs the reconciliation passes on a
//! schedule, or runs a single pass and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xpm_common::config::TomlConfig;
use xpm_sync::remote::Remotes;
use xpm_sync::services::tasks::{run_task, SyncTask};
use xpm_sync::{build_router, scheduler, AppState};

#[derive(Parser, Debug)]
#[command(name = "xpm-sync")]
#[command(about = "Experiment status synchronization service")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "XPM_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "XPM_DATABASE")]
    database: Option<PathBuf>,

    /// Address to bind the HTTP API to (overrides the config file)
    #[arg(short, long, env = "XPM_BIND")]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and run scheduled passes (default)
    Serve {
        /// Do not run scheduled passes
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run one named pass and print its report
    Run {
        /// check_kinto_push_queue, check_experiment_is_live,
        /// check_experiment_is_complete or update_experiment_status
        task: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xpm_sync=info,xpm_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting xpm-sync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());

    let pool = xpm_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let remotes = Remotes::from_config(&config).context("Failed to build HTTP clients")?;

    match args.command.unwrap_or(Command::Serve { no_scheduler: false }) {
        Command::Run { task } => {
            let task: SyncTask = task.parse()?;
            let report = run_task(task, &pool, &remotes, &config)
                .await
                .with_context(|| format!("Task {} failed", task))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Serve { no_scheduler } => serve(AppState::new(pool, config, remotes), no_scheduler).await,
    }
}

async fn serve(state: AppState, no_scheduler: bool) -> Result<()> {
    let cancel = CancellationToken::new();

    let handles = if no_scheduler || !state.config.schedule.enabled {
        info!("Scheduled passes disabled");
        Vec::new()
    } else {
        scheduler::spawn_all(state.clone(), cancel.clone())
    };

    let bind_address = state.config.bind_address.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("xpm-sync listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
