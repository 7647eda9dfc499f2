// API module - HTTP endpoints

use axum::{routing::get, Router};
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub mod general;
pub mod health;
pub mod middleware;

use middleware::faults::handle_panic;
use middleware::session::{signing_key, AppState, SESSION_COOKIE_NAME, SESSION_MAX_AGE};

/// Builds the application router. Database-backed route modules merge in
/// here and reach the pool through `State<MySqlPool>`.
pub fn router(state: AppState) -> Router {
    // In-memory sessions in a signed cookie, renewed on every request
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(SESSION_MAX_AGE))
        .with_signed(signing_key(&state.config.session_secret));
    let uploads = ServeDir::new(&state.config.upload_dir);
    let public = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(general::router())
        .nest_service("/uploads", uploads)
        .fallback_service(public)
        .layer(session_layer)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
