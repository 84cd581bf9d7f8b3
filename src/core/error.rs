//! Request-level error taxonomy and its mapping onto HTTP responses.
//!
//! Only [`GatewayError::NoRouteMatched`] and [`GatewayError::UpstreamTransport`]
//! normally reach the caller. Timeouts and open circuits are absorbed by the
//! route's fallback and only surface here when the route declares none.
use std::time::Duration;

use axum::{
    body::Body as AxumBody,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::core::dispatcher::DispatchError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("No route matched {method} {path}")]
    NoRouteMatched { method: String, path: String },

    #[error("Upstream call via circuit breaker '{breaker}' exceeded {timeout:?}")]
    UpstreamTimeout { breaker: String, timeout: Duration },

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(#[from] DispatchError),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Fallback endpoint '{0}' not found")]
    FallbackNotFound(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::FallbackNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = serde_json::json!({
            "status": status.as_u16(),
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.to_string(),
        });

        let mut response = Response::new(AxumBody::from(body.to_string()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        response
    }
}
