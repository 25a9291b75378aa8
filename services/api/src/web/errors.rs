//! services/api/src/web/errors.rs
//!
//! Maps port errors onto HTTP status codes.

use axum::{extract::rejection::JsonRejection, http::StatusCode};
use storefront_core::ports::PortError;
use tracing::error;

/// The error half of every handler's return type.
pub type HandlerError = (StatusCode, String);

/// Converts a port error into a response. Storage and unexpected failures are logged
/// and answered with a generic body.
pub fn reject(e: PortError) -> HandlerError {
    match e {
        PortError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg),
        PortError::EmptyCart => (
            StatusCode::BAD_REQUEST,
            "Cart is empty or not found".to_string(),
        ),
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("Not found: {}", msg)),
        PortError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            "Authentication required".to_string(),
        ),
        PortError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
        PortError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        PortError::StorageUnavailable(_) | PortError::Unexpected(_) => {
            error!("Request failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

/// Malformed JSON bodies are a client error, whatever axum's default status would be.
pub fn bad_json(rejection: JsonRejection) -> HandlerError {
    (StatusCode::BAD_REQUEST, rejection.body_text())
}

/// Converts a signed quantity from a request body into the domain's `u32`.
pub fn quantity_from_request(quantity: i64) -> Result<u32, HandlerError> {
    u32::try_from(quantity).map_err(|_| {
        reject(PortError::InvalidArgument(format!(
            "quantity {} is out of range",
            quantity
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cart_is_a_client_error() {
        assert_eq!(reject(PortError::EmptyCart).0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_failures_do_not_leak_details() {
        let (status, body) = reject(PortError::StorageUnavailable("pool timed out".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("pool"));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        assert_eq!(
            quantity_from_request(-1).map_err(|e| e.0),
            Err(StatusCode::BAD_REQUEST)
        );
        assert_eq!(quantity_from_request(4).ok(), Some(4));
    }
}
