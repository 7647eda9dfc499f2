use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ngo_portal::api::{self, middleware::session::AppState};
use ngo_portal::config::Config;
use ngo_portal::db::DbPool;
use ngo_portal::lifecycle::{self, Lifecycle, Phase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ngo_portal=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    lifecycle::install_panic_hook();

    tracing::info!("Starting NGO portal...");

    // Load configuration
    let config = Config::from_env()?;
    if config.uses_default_secret() {
        tracing::warn!("SECRET_KEY not set, using the development session secret");
    }
    tracing::info!("Configuration loaded successfully");

    // Create database pool (lazy, no connection yet)
    let db = DbPool::configure(&config.database)?;

    // Reachability check + schema reconciliation; never fatal
    let lifecycle = Lifecycle::new();
    let phase = lifecycle::boot(&db, &lifecycle).await;

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        lifecycle: lifecycle.clone(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    match phase {
        Phase::ConnectedServing => tracing::info!("Server running on http://{}", addr),
        _ => tracing::warn!("Server running without database on http://{}", addr),
    }

    // Stops accepting on signal and waits for in-flight requests
    let signal_lifecycle = lifecycle.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            lifecycle::shutdown_signal().await;
            if let Err(e) = signal_lifecycle.advance(Phase::ShuttingDown) {
                tracing::debug!(error = %e, "Shutdown signal outside a serving phase");
            }
        })
        .await;

    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server stopped with an error");
    }

    tracing::info!("Gracefully shutting down...");
    lifecycle::shutdown(&db, &lifecycle, config.shutdown_timeout).await;

    served?;
    Ok(())
}
