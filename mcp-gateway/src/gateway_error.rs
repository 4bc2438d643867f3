//! # Gateway Error Types
//!
//! The single error type returned by every HTTP handler, mapped to a
//! status code and JSON body in one place so handlers never construct
//! `Response`s by hand.
//!
//! ## HTTP Status Code Mapping
//!
//! - **400 Bad Request** — malformed request body or registration payload
//! - **401 Unauthorized** — missing or invalid credentials
//! - **403 Forbidden** — valid credentials, insufficient scope
//! - **404 Not Found** — unknown template or instance
//! - **502 Bad Gateway** — every healthy instance failed the dispatch
//! - **503 Service Unavailable** — no healthy instance exists for the template
//! - **500 Internal Server Error** — persistence or other unexpected failure

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcp_gateway_core::{DispatchError, RegistryError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication required: {message}")]
    Unauthenticated { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("no healthy instance available for template '{template}'")]
    NoHealthyInstance { template: String },

    #[error("all candidate instances failed: {0}")]
    DispatchExhausted(#[from] DispatchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        GatewayError::Internal { message: err.to_string() }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            GatewayError::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            GatewayError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            GatewayError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::NoHealthyInstance { .. } => (StatusCode::SERVICE_UNAVAILABLE, "no_healthy_instance"),
            GatewayError::DispatchExhausted(_) => (StatusCode::BAD_GATEWAY, "dispatch_failed"),
            GatewayError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registry_error"),
            GatewayError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_healthy_instance_maps_to_503() {
        let err = GatewayError::NoHealthyInstance { template: "echo".to_string() };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = GatewayError::NotFound { message: "template 'x' not found".to_string() };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
