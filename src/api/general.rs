use askama::Template;
use axum::{routing::get, Router};

use crate::api::middleware::session::{AppState, SessionContext};

#[derive(Template)]
#[template(path = "index.html")]
struct HomeTemplate {
    session: SessionContext,
}

/// Landing page; renders without touching the database.
async fn home(session: SessionContext) -> HomeTemplate {
    HomeTemplate { session }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(home))
}
