use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::any::Any;

use crate::error::GENERIC_FAILURE_BODY;
use crate::lifecycle::panic_message;

/// Response for a handler that panicked. Used with `CatchPanicLayer` so a
/// single faulty request cannot take the process down.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(payload.as_ref()), "Request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE_BODY).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_becomes_generic_500() {
        let response = handle_panic(Box::new("index out of bounds"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
