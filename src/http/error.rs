//! Gateway error taxonomy and its JSON rendering.
//!
//! # Design Decisions
//! - Transport faults are mapped here, at the relay boundary, and nowhere else
//! - The gateway only manufactures the kinds below; upstream statuses pass through
//! - Every error body is `{"error": <kind>, "message": <text>}`

use std::time::Duration;

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors the gateway itself produces.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway does not have a route for {path}")]
    RouteNotFound { path: String, available: Vec<String> },

    #[error("Method {method} not supported")]
    UnsupportedMethod { method: Method },

    #[error("Could not decode request body: {0}")]
    MalformedRequest(String),

    #[error("Could not connect to {service}: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("{service} did not respond within {}s", .after.as_secs_f32())]
    UpstreamTimeout { service: String, after: Duration },

    #[error("{service} sent a response that cannot be relayed: {message}")]
    UpstreamProtocolError { service: String, message: String },

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable kind name used in error bodies and SSE error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "RouteNotFound",
            GatewayError::UnsupportedMethod { .. } => "UnsupportedMethod",
            GatewayError::MalformedRequest(_) => "MalformedRequest",
            GatewayError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            GatewayError::UpstreamTimeout { .. } => "UpstreamTimeout",
            GatewayError::UpstreamProtocolError { .. } => "UpstreamProtocolError",
            GatewayError::Internal(_) => "GatewayInternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::UnsupportedMethod { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamProtocolError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a failure to send the upstream request.
    pub fn from_send(service: &str, err: reqwest::Error, ceiling: Duration) -> Self {
        if err.is_connect() {
            GatewayError::UpstreamUnavailable {
                service: service.to_string(),
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            GatewayError::UpstreamTimeout {
                service: service.to_string(),
                after: ceiling,
            }
        } else {
            GatewayError::Internal(format!("{}: {}", service, err))
        }
    }

    /// Map a failure while reading an upstream response body.
    pub fn from_body(service: &str, err: reqwest::Error, ceiling: Duration) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout {
                service: service.to_string(),
                after: ceiling,
            }
        } else {
            GatewayError::UpstreamProtocolError {
                service: service.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            available_routes: match self {
                GatewayError::RouteNotFound { available, .. } => Some(available.clone()),
                _ => None,
            },
        }
    }
}

/// JSON shape of every gateway-generated error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_routes: Option<Vec<String>>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_and_kinds() {
        let cases = [
            (GatewayError::MalformedRequest("x".into()), 400, "MalformedRequest"),
            (
                GatewayError::UpstreamUnavailable { service: "a".into(), message: "refused".into() },
                503,
                "UpstreamUnavailable",
            ),
            (
                GatewayError::UpstreamTimeout { service: "a".into(), after: Duration::from_secs(2) },
                504,
                "UpstreamTimeout",
            ),
            (
                GatewayError::UpstreamProtocolError { service: "a".into(), message: "eof".into() },
                502,
                "UpstreamProtocolError",
            ),
            (GatewayError::Internal("boom".into()), 500, "GatewayInternalError"),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn not_found_body_lists_routes() {
        let err = GatewayError::RouteNotFound {
            path: "/nope".into(),
            available: vec!["/api/main/*".into()],
        };
        let json = serde_json::to_value(err.body()).unwrap();
        assert_eq!(json["error"], "RouteNotFound");
        assert_eq!(json["available_routes"][0], "/api/main/*");
        assert!(json["message"].as_str().unwrap().contains("/nope"));

        let other = serde_json::to_value(GatewayError::Internal("x".into()).body()).unwrap();
        assert!(other.get("available_routes").is_none());
    }
}
