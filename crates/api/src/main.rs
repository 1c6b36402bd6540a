use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use autotune_cloud::{LocalBackend, LocalObjectStore, ObjectStore, S3ObjectStore};
use autotune_db::{MemoryStore, PgStore};
use autotune_events::{EmailConfig, EmailDelivery, RecordingTransport, ReportTransport};
use autotune_nightscout::NightscoutClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autotune_api::config::{ServerConfig, StorageConfig};
use autotune_api::router::build_app_router;
use autotune_api::state::{AppState, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autotune_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Object storage ---
    let objects: Arc<dyn ObjectStore> = match &config.storage {
        StorageConfig::S3 { bucket } => {
            tracing::info!(bucket = %bucket, "Using S3 object storage");
            Arc::new(S3ObjectStore::from_env(bucket.clone()).await)
        }
        StorageConfig::Local { root } => {
            tracing::info!(root = %root.display(), "Using local object storage");
            Arc::new(LocalObjectStore::new(root.clone()))
        }
    };

    // --- Execution backend ---
    let execution = Arc::new(LocalBackend::new(
        config.local_work_root.clone(),
        Arc::clone(&objects),
    ));

    // --- Report delivery ---
    let transport: Arc<dyn ReportTransport> = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(smtp_host = %email.smtp_host, "Email delivery enabled");
            Arc::new(EmailDelivery::new(email))
        }
        None => {
            tracing::warn!("SMTP_HOST not set, reports are only kept in memory");
            Arc::new(RecordingTransport::new())
        }
    };

    // --- Database ---
    let backends = match &config.database_url {
        Some(database_url) => {
            let pool = autotune_db::create_pool(database_url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connection pool created");

            autotune_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            autotune_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            let store = Arc::new(PgStore::new(pool));
            Backends {
                ledger: store.clone(),
                settings: store.clone(),
                counters: store,
                objects,
                execution,
                transport,
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using an in-memory ledger");
            let store = Arc::new(MemoryStore::new());
            Backends {
                ledger: store.clone(),
                settings: store.clone(),
                counters: store,
                objects,
                execution,
                transport,
            }
        }
    };

    let nightscout = NightscoutClient::new().context("Failed to build Nightscout client")?;

    // --- App state ---
    let state = AppState::new(config.clone(), backends, nightscout);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, callback_url = %config.callback_url(), "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
