//! ReelSafe Server
//!
//! Receives chunked video uploads, reassembles and commits them to object
//! storage, and issues time-boxed playback references.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelsafe::catalog::SqliteCatalog;
use reelsafe::config::Config;
use reelsafe::routes;
use reelsafe::state::AppState;
use reelsafe::storage::S3Client;
use reelsafe::upload::side_cache::SqliteSideCache;
use reelsafe::upload::{ChunkStore, Committer, SessionTracker, TrackerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "reelsafe=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting ReelSafe Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 endpoint: {}", config.storage.endpoint);

    let s3_client = S3Client::new(&config.storage)
        .await
        .context("Failed to initialize S3 client")?;
    tracing::info!("S3 bucket: {}", s3_client.bucket());

    let db_pool = reelsafe::db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let object_store = Arc::new(s3_client);
    let catalog = Arc::new(SqliteCatalog::new(db_pool.clone()));
    let side_cache = Arc::new(SqliteSideCache::new(db_pool));

    let chunk_store = match &config.upload.chunk_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create chunk directory {}", dir.display()))?;
            ChunkStore::with_local_storage(dir.clone())
        }
        None => ChunkStore::in_memory(),
    };

    let committer = Committer::new(object_store.clone()).with_catalog(catalog.clone());
    let tracker = SessionTracker::new(
        chunk_store,
        side_cache,
        committer,
        TrackerSettings::from(&config.upload),
    );

    match tracker.recover().await {
        Ok(count) => tracing::info!("Recovered {} upload sessions", count),
        Err(e) => tracing::warn!("Session recovery failed: {}. Starting empty", e),
    }
    tracker.clone().start_sweep_task(config.upload.sweep_interval());

    let app_state = AppState::new(config.clone(), tracker, object_store, catalog);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::api_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let ip: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!("ReelSafe Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
