//! Persistent Cache - cache node server
//!
//! Runs one cache node with its persistence tier behind a REST API.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use persistent_cache::api::create_router;
use persistent_cache::{spawn_reaper_task, AppState, Cache, Config};

/// Main entry point for the cache node.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the node and its store stack, then start it (preloading if configured)
/// 4. Start the expiration reaper
/// 5. Serve the HTTP API until SIGINT/SIGTERM
/// 6. Stop the node, passivating and draining the store stack
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "persistent_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Persistent Cache node");

    let config = Config::from_env();
    info!(
        "Configuration loaded: node={}, max_entries={}, default_ttl={}s, port={}, stores={}",
        config.node_name,
        config.max_entries,
        config.default_ttl,
        config.server_port,
        config.store.stores.len()
    );

    let cache = Cache::new(&config, None).context("failed to build cache node")?;
    let starter = cache.clone();
    tokio::task::spawn_blocking(move || starter.start())
        .await?
        .context("failed to start cache node")?;
    info!(
        "Cache node started with store stack: {}",
        cache.persistence().stack().describe()
    );

    let reaper_handle = config.store.reaper_interval().map(|interval| {
        spawn_reaper_task(cache.clone(), interval, config.store.purge_synchronously)
    });
    if reaper_handle.is_none() {
        info!("Expiration reaper disabled");
    }

    let app = create_router(AppState::new(cache.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reaper_handle))
        .await
        .context("server error")?;

    let stopping = cache.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.stop()).await? {
        error!("Cache node did not stop cleanly: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts the reaper.
async fn shutdown_signal(reaper_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = reaper_handle {
        handle.abort();
        warn!("Expiration reaper aborted");
    }
}
