//! Process entrypoint: logging, configuration, rehydrate, serve, persist.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use data_connector::{NoopStateStore, RedisStateStore, StateStore};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use patches_server::{
    api::{self, AppState},
    config,
    server::ServerState,
};

#[derive(Debug, Parser)]
#[command(name = "patches-server", about = "Caching vulnerability feed server")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "CONFIG_FILE", default_value = "config/default.json")]
    config: PathBuf,

    /// Override the configured listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let host = args.host.unwrap_or(config.server.host);
    let port = args.port.unwrap_or(config.server.port);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building upstream http client")?;

    let store: Arc<dyn StateStore> = match config.redis {
        Some(redis) => {
            Arc::new(RedisStateStore::new(redis).context("connecting state store")?)
        }
        None => Arc::new(NoopStateStore::new()),
    };

    let state = ServerState::configure(config.state, http);

    match store.load().await {
        Ok(Some(snapshot)) => state.restore(snapshot).await,
        Ok(None) => info!("no persisted state found, starting cold"),
        Err(e) => warn!(error = %e, "failed to load persisted state, starting cold"),
    }

    let app_state = Arc::new(AppState { state });
    let router = api::router(app_state.clone());

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!(host = %host, port, "patches server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    info!("persisting state before shutdown");
    let snapshot = app_state.state.snapshot().await;
    if let Err(e) = store.persist(&snapshot).await {
        error!(error = %e, "failed to persist state on shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
