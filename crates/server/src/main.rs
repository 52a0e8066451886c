//! Depot server binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::config::AppConfig;
use depot_server::{create_router, AppState, Dispatcher, JOB_QUEUE_CAPACITY};
use depot_storage::BlobStore;
use depot_upstream::UpstreamClient;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a deduplicated object-storage gateway
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway: HTTP surface, dispatcher, and worker pool.
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "DEPOT_CONFIG", default_value = "config/depot.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve { config } => serve(&config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().map_err(anyhow::Error::msg)?;

    let metadata = depot_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("metadata store initialized");

    let blobs = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;
    blobs
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(backend = blobs.backend_name(), "blob store initialized");

    let upstream = UpstreamClient::new(&config.upstream, reqwest::Client::new());

    let worker_count = config.worker.count;
    let bind_addr = config.server.bind_addr();
    let state = AppState::new(config, metadata, blobs, upstream);
    let shutdown = CancellationToken::new();

    let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let dispatcher = Dispatcher::new(state.metadata.clone(), jobs_tx, shutdown.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let worker_handles =
        depot_server::worker::spawn_workers(state.clone(), jobs_rx, worker_count, shutdown.clone());
    tracing::info!(workers = worker_count, "worker pool started");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    // Workers finish their current suspension point and return; in-flight
    // jobs are abandoned and re-claimed by the next process after the skew.
    shutdown.cancel();
    let _ = dispatcher_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Load configuration: TOML file (optional), flat legacy env vars, then
/// `DEPOT_`-prefixed nested env vars, later sources winning.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "loading configuration file");
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(legacy_env());

    // Flat legacy vars select a backend without carrying the config tag.
    if std::env::var_os("PG_HOST").is_some() {
        figment = figment.merge(("metadata.type", "postgres"));
    }
    if std::env::var_os("S3_BUCKET").is_some() || std::env::var_os("AWS_BUCKET").is_some() {
        figment = figment.merge(("storage.type", "s3"));
    }

    figment = figment.merge(Env::prefixed("DEPOT_").split("__"));

    figment.extract().context("failed to load configuration")
}

/// Flat environment variables kept for deployment compatibility, mapped
/// onto their nested config keys.
fn legacy_env() -> Env {
    Env::raw()
        .only(&[
            "WEB_HOST",
            "WEB_PORT",
            "WORKERS",
            "PG_HOST",
            "PG_PORT",
            "PG_USER",
            "PG_PASSWORD",
            "PG_DB",
            "AWS_BUCKET",
            "S3_BUCKET",
            "S3_ENDPOINT",
            "S3_REGION",
            "S3_ACCESS_KEY",
            "S3_SECRET_KEY",
            "WEBTOR_API_KEY",
            "WEBTOR_API_SECRET",
            "REST_API_SERVICE_HOST",
            "REST_API_SERVICE_PORT",
            "REST_API_SECURE",
            "REST_API_EXPIRE",
            "USE_INTERNAL_TORRENT_HTTP_PROXY",
            "TORRENT_HTTP_PROXY_SERVICE_HOST",
            "TORRENT_HTTP_PROXY_SERVICE_PORT",
        ])
        .map(|key| {
            let mapped = match key.as_str().to_ascii_uppercase().as_str() {
                "WEB_HOST" => "server.host",
                "WEB_PORT" => "server.port",
                "WORKERS" => "worker.count",
                "PG_HOST" => "metadata.host",
                "PG_PORT" => "metadata.port",
                "PG_USER" => "metadata.username",
                "PG_PASSWORD" => "metadata.password",
                "PG_DB" => "metadata.database",
                "AWS_BUCKET" | "S3_BUCKET" => "storage.bucket",
                "S3_ENDPOINT" => "storage.endpoint",
                "S3_REGION" => "storage.region",
                "S3_ACCESS_KEY" => "storage.access_key_id",
                "S3_SECRET_KEY" => "storage.secret_access_key",
                "WEBTOR_API_KEY" => "upstream.api_key",
                "WEBTOR_API_SECRET" => "upstream.api_secret",
                "REST_API_SERVICE_HOST" => "upstream.host",
                "REST_API_SERVICE_PORT" => "upstream.port",
                "REST_API_SECURE" => "upstream.secure",
                "REST_API_EXPIRE" => "upstream.expire_days",
                "USE_INTERNAL_TORRENT_HTTP_PROXY" => "upstream.use_internal_proxy",
                "TORRENT_HTTP_PROXY_SERVICE_HOST" => "upstream.proxy_host",
                "TORRENT_HTTP_PROXY_SERVICE_PORT" => "upstream.proxy_port",
                other => return other.to_string().into(),
            };
            mapped.into()
        })
        .split(".")
}
