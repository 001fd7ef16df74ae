//! Tollgate API Server
//!
//! REST API server for authentication and session revocation.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate_api::{create_router, state::AppState};
use tollgate_core::config::{AppConfig, LoggingConfig, DEV_JWT_SECRET};
use tollgate_core::{KeyValueStore, MemoryStore, PgUserDirectory, RedisStore, StoreBackend};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tollgate_api={level},tollgate_core={level},audit=info,tower_http=info",
            level = logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    init_tracing(&config.logging);

    if config.jwt.secret == DEV_JWT_SECRET {
        tracing::warn!("JWT_SECRET is not set, using the development secret");
    }

    // Session store
    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.redis)
                .await
                .context("Failed to connect to Redis")?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory session store, revocations are not shared between instances");
            Arc::new(MemoryStore::new())
        }
    };

    // User directory
    let directory = PgUserDirectory::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    directory
        .ensure_schema()
        .await
        .context("Failed to prepare users table")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(config, store, Arc::new(directory)));

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Tollgate API Server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    // Peer addresses feed the per-client rate limit
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
