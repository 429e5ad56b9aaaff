//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Decide the body kind once per request
//! - Filter headers before forwarding to an upstream
//! - Snapshot the inbound request as a `ProxiedRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Body kind is a tagged variant with one encoder per variant (see relay/forwarder.rs)
//! - Uploads are read into memory, bounded by the configured body limit

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequest, Multipart},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request},
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::error::GatewayError;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Read the request ID stamped by the request-id layer.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Verbs the gateway relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RelayMethod {
    pub fn as_method(self) -> Method {
        match self {
            RelayMethod::Get => Method::GET,
            RelayMethod::Post => Method::POST,
            RelayMethod::Put => Method::PUT,
            RelayMethod::Patch => Method::PATCH,
            RelayMethod::Delete => Method::DELETE,
        }
    }

    /// GET and DELETE are forwarded without a body.
    pub fn carries_body(self) -> bool {
        !matches!(self, RelayMethod::Get | RelayMethod::Delete)
    }
}

impl TryFrom<&Method> for RelayMethod {
    type Error = GatewayError;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match *method {
            Method::GET => Ok(RelayMethod::Get),
            Method::POST => Ok(RelayMethod::Post),
            Method::PUT => Ok(RelayMethod::Put),
            Method::PATCH => Ok(RelayMethod::Patch),
            Method::DELETE => Ok(RelayMethod::Delete),
            _ => Err(GatewayError::UnsupportedMethod {
                method: method.clone(),
            }),
        }
    }
}

/// One uploaded file part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Inbound body, decoded once.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// Raw JSON bytes, forwarded verbatim after a syntax check.
    Json(Bytes),
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<UploadedFile>,
    },
}

impl RequestBody {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Empty => "none",
            RequestBody::Json(_) => "json",
            RequestBody::Form(_) => "form",
            RequestBody::Multipart { .. } => "multipart",
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Json,
    Form,
    Multipart,
    Other,
}

fn content_kind(headers: &HeaderMap) -> ContentKind {
    let Some(value) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return ContentKind::Other;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "multipart/form-data" {
        ContentKind::Multipart
    } else if mime == "application/x-www-form-urlencoded" {
        ContentKind::Form
    } else if mime == "application/json" || mime.ends_with("+json") {
        ContentKind::Json
    } else {
        ContentKind::Other
    }
}

/// Snapshot of an inbound request, ready to relay.
#[derive(Debug)]
pub struct ProxiedRequest {
    pub method: RelayMethod,
    pub target_path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ProxiedRequest {
    /// Decode `request` for the upstream at `target_path`.
    ///
    /// `body_limit` bounds buffered JSON and form bodies. Multipart reads
    /// are bounded by the router's `DefaultBodyLimit`.
    pub async fn from_request(
        request: Request<Body>,
        target_path: String,
        body_limit: usize,
    ) -> Result<Self, GatewayError> {
        let method = RelayMethod::try_from(request.method())?;
        let query = request.uri().query().map(str::to_string);
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let inbound_headers = request.headers().clone();

        let body = if method.carries_body() {
            decode_body(request, body_limit).await?
        } else {
            RequestBody::Empty
        };

        let headers = outbound_headers(&inbound_headers, &body, client_ip);

        Ok(Self {
            method,
            target_path,
            query,
            headers,
            body,
        })
    }
}

async fn decode_body(request: Request<Body>, limit: usize) -> Result<RequestBody, GatewayError> {
    match content_kind(request.headers()) {
        ContentKind::Multipart => decode_multipart(request).await,
        ContentKind::Json => {
            let bytes = read_bytes(request, limit).await?;
            if bytes.is_empty() {
                return Ok(RequestBody::Empty);
            }
            serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)
                .map_err(|e| GatewayError::MalformedRequest(format!("invalid JSON: {}", e)))?;
            Ok(RequestBody::Json(bytes))
        }
        ContentKind::Form => {
            let bytes = read_bytes(request, limit).await?;
            let pairs = url::form_urlencoded::parse(&bytes)
                .into_owned()
                .collect::<Vec<_>>();
            Ok(RequestBody::Form(pairs))
        }
        ContentKind::Other => Ok(RequestBody::Empty),
    }
}

async fn read_bytes(request: Request<Body>, limit: usize) -> Result<Bytes, GatewayError> {
    axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| GatewayError::MalformedRequest(format!("could not read body: {}", e)))
}

async fn decode_multipart(request: Request<Body>) -> Result<RequestBody, GatewayError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| GatewayError::MalformedRequest(e.body_text()))?;

    let mut fields = Vec::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::MalformedRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| GatewayError::MalformedRequest(e.body_text()))?;

        match filename {
            Some(filename) => files.push(UploadedFile {
                field: name,
                filename,
                content_type,
                data,
            }),
            None => fields.push((name, String::from_utf8_lossy(&data).into_owned())),
        }
    }

    Ok(RequestBody::Multipart { fields, files })
}

/// RFC 7230 hop-by-hop headers plus the ones the client library recomputes.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "content-length"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers named in `Connection`, lowercased.
pub(crate) fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Build the header set sent upstream.
pub fn outbound_headers(
    inbound: &HeaderMap,
    body: &RequestBody,
    client_ip: Option<IpAddr>,
) -> HeaderMap {
    let named = connection_tokens(inbound);
    let mut headers = HeaderMap::with_capacity(inbound.len() + 1);

    for (name, value) in inbound {
        if is_hop_by_hop(name) || named.iter().any(|t| t == name.as_str()) {
            continue;
        }
        // The multipart encoder writes its own boundary.
        if *name == header::CONTENT_TYPE && body.is_multipart() {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(ip) = client_ip {
        let forwarded = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers
}
