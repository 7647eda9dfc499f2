use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Request-time failures. Details go to the log; clients get a generic body.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

pub const GENERIC_FAILURE_BODY: &str = "Something broke!";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("Not found: {}", what)).into_response()
            }
            other => {
                tracing::error!(error = ?other, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE_BODY).into_response()
            }
        }
    }
}
