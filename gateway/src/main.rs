use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rategate_internal::config::Config;
use rategate_internal::counter_store::RedisCounterStore;
use rategate_internal::endpoints::build_router;
use rategate_internal::gateway_util::AppStateData;
use rategate_internal::subscription_store::{ensure_default_plan, PostgresStore};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rategate")]
#[command(version, about = "Distributed rate limiter for the notification gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted;
    /// REDIS_URL and DATABASE_URL environment variables override the file.
    #[arg(long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Rategate {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config_file {
        Some(path) => match Config::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("No config file provided, using defaults");
            Config::default()
        }
    };

    let counter_store = match RedisCounterStore::new(&config.redis.url, config.redis.timeout_ms).await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to initialize counter store: {e}");
            std::process::exit(1);
        }
    };
    info!(url = %config.redis.url, "Connected to counter store");

    let subscription_store = match PostgresStore::new(&config.database.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to initialize subscription store: {e}");
            std::process::exit(1);
        }
    };
    info!("Connected to subscription store");

    if let Err(e) = ensure_default_plan(subscription_store.as_ref()).await {
        tracing::error!("Failed to ensure default subscription plan: {e}");
        std::process::exit(1);
    }

    let bind_address = config.gateway.bind_address;
    let state = AppStateData::new(config, counter_store, subscription_store);
    let router = build_router(state);

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {bind_address}");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Rategate stopped");
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
