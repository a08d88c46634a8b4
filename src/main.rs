// src/main.rs

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use relaybase::api;
use relaybase::config::Config;
use relaybase::container::DockerRuntime;
use relaybase::db::Database;
use relaybase::state::AppState;
use relaybase::tasks::spawn_metrics_reporter;

const METRICS_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "relaybase")]
#[command(about = "Container function runner with topic routing and live push")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server and the cron trigger
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.validate()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.tracing_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Migrate => migrate(config).await,
    }
}

async fn migrate(config: Config) -> anyhow::Result<()> {
    let mut urls = vec![config.database_url.clone()];
    if config.document_database_url != config.database_url {
        urls.push(config.document_database_url.clone());
    }

    for url in urls {
        Database::new(url.clone(), 1)
            .pool()
            .await
            .with_context(|| format!("Failed to migrate {}", url))?;
    }

    info!("Database is up to date");
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting relaybase {}", env!("CARGO_PKG_VERSION"));

    let runtime = Arc::new(DockerRuntime::connect()?);
    let state = Arc::new(AppState::from_config(&config, runtime));

    if config.cron_enabled {
        if let Err(e) = state.cron.start().await {
            error!("Cron trigger failed to start: {}", e);
        }
    } else {
        warn!("Cron trigger disabled");
    }

    let metrics_handle = spawn_metrics_reporter(state.metrics.clone(), METRICS_INTERVAL);

    let app = api::router(state.clone());
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    info!("Listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.cron.stop().await;
    metrics_handle.abort();
    state.metrics.report();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
