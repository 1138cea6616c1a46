use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{error, info, warn};

use circulation_api::{
    AppState, Config, build_router,
    store::{LibraryStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,circulation_api=debug,sqlx=warn".into()),
        )
        .json()
        .init();

    info!("Starting circulation API v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let store: Arc<dyn LibraryStore> = match &config.database_url {
        Some(url) => {
            let db = connect_with_retry(url, config.database_max_connections)
                .await
                .map_err(|e| anyhow!("Failed to connect to PostgreSQL after retries: {e}"))?;
            let store = PgStore::new(db);

            info!("Running database migrations...");
            store.migrate().await.context("Migration failed")?;
            info!("Database migrations completed successfully");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(store, config.clone()));
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("Server error: {e}"))?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn connect_with_retry(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let mut delay = Duration::from_millis(500);
    let max_attempts = 30;
    let mut attempt = 1;

    loop {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL on attempt {attempt}");
                return Ok(pool);
            }
            Err(e) if attempt >= max_attempts => {
                error!("All connection attempts failed");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Database connection failed (attempt {}/{}): {e}, retrying in {:?}",
                    attempt, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
        }
    }
}

// Graceful shutdown on Ctrl+C (SIGINT) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }

    info!("Shutdown signal received, closing server...");
}
