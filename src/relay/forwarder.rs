//! Ordinary (non-streaming) request forwarding.
//!
//! # Responsibilities
//! - Encode the proxied body for the upstream, one encoder per body kind
//! - Apply the per-request timeout ceiling
//! - Mirror the upstream status, headers and body verbatim
//!
//! # Design Decisions
//! - One shared `reqwest::Client`; proxies disabled and redirects relayed, not followed
//! - Transport faults become `GatewayError`s here; nothing is retried

use std::time::{Duration, Instant};

use reqwest::{
    multipart::{Form, Part},
    redirect::Policy,
    Client, RequestBuilder,
};

use crate::http::error::GatewayError;
use crate::http::request::{ProxiedRequest, RequestBody};
use crate::http::response::{RelayBody, RelayOutcome};
use crate::resilience::TimeoutPolicy;
use crate::routing::ServiceDescriptor;

/// Build the upstream HTTP client shared by the forwarder, relay and probes.
pub fn upstream_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .no_proxy()
        .redirect(Policy::none())
        .connect_timeout(connect_timeout)
        .user_agent(concat!("fleet-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Relays one request and buffers the whole upstream answer.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    policy: TimeoutPolicy,
}

impl Forwarder {
    pub fn new(client: Client, policy: TimeoutPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn forward(
        &self,
        service: &ServiceDescriptor,
        request: ProxiedRequest,
    ) -> Result<RelayOutcome, GatewayError> {
        let method = request.method.as_method();
        let ceiling = self.policy.for_request(service, &method);
        let url = service.upstream_url(&request.target_path, request.query.as_deref());
        let start = Instant::now();

        tracing::debug!(
            service = %service.key,
            method = %method,
            url = %url,
            body = request.body.kind(),
            timeout_secs = ceiling.as_secs(),
            "Forwarding request"
        );

        let builder = self
            .client
            .request(method, url)
            .headers(request.headers)
            .timeout(ceiling);
        let builder = encode_body(builder, request.body)?;

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(service = %service.key, error = %e, "Upstream request failed");
            GatewayError::from_send(&service.key, e, ceiling)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            tracing::warn!(service = %service.key, error = %e, "Upstream body read failed");
            GatewayError::from_body(&service.key, e, ceiling)
        })?;

        tracing::debug!(
            service = %service.key,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        Ok(RelayOutcome::new(status, &headers, RelayBody::Full(body)))
    }
}

/// Attach the body encoder matching the body kind.
pub(crate) fn encode_body(
    builder: RequestBuilder,
    body: RequestBody,
) -> Result<RequestBuilder, GatewayError> {
    Ok(match body {
        RequestBody::Empty => builder,
        RequestBody::Json(bytes) => builder.body(bytes),
        RequestBody::Form(pairs) => builder.form(&pairs),
        RequestBody::Multipart { fields, files } => {
            let mut form = Form::new();
            for (name, value) in fields {
                form = form.text(name, value);
            }
            for file in files {
                let mut part = Part::bytes(file.data.to_vec()).file_name(file.filename);
                if let Some(content_type) = file.content_type {
                    part = part.mime_str(&content_type).map_err(|e| {
                        GatewayError::MalformedRequest(format!(
                            "invalid content type for part '{}': {}",
                            file.field, e
                        ))
                    })?;
                }
                form = form.part(file.field, part);
            }
            builder.multipart(form)
        }
    })
}
