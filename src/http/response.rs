//! Response handling and transformation.
//!
//! # Responsibilities
//! - Carry the upstream status, headers and body back to the client
//! - Strip hop-by-hop headers from upstream responses
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Successful upstream payloads pass through unchanged
//! - Hop-by-hop headers stripped automatically

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::http::request::{connection_tokens, is_hop_by_hop};

/// Body of a relayed response.
pub enum RelayBody {
    /// Fully read upstream body (ordinary relay).
    Full(Bytes),
    /// Open byte stream (streaming relay).
    Stream(Body),
}

impl std::fmt::Debug for RelayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            RelayBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// What the gateway writes back to the client.
#[derive(Debug)]
pub struct RelayOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl RelayOutcome {
    pub fn new(status: StatusCode, upstream_headers: &HeaderMap, body: RelayBody) -> Self {
        Self {
            status,
            headers: response_headers(upstream_headers),
            body,
        }
    }
}

impl IntoResponse for RelayOutcome {
    fn into_response(self) -> Response {
        let body = match self.body {
            RelayBody::Full(bytes) => Body::from(bytes),
            RelayBody::Stream(body) => body,
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Upstream response headers minus the connection-specific ones.
///
/// `content-length` is dropped as well; the server recomputes it for full
/// bodies and uses chunked encoding for streams.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let named = connection_tokens(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || named.iter().any(|t| t == name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[test]
    fn keeps_upstream_headers_but_not_framing() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        upstream.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let headers = response_headers(&upstream);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn outcome_keeps_status() {
        let outcome = RelayOutcome::new(
            StatusCode::IM_A_TEAPOT,
            &HeaderMap::new(),
            RelayBody::Full(Bytes::from_static(b"short")),
        );
        let response = outcome.into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
