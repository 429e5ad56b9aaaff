//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health endpoint and the proxy fallback
//! - Wire up middleware (tracing, request ID, CORS, body limit)
//! - Bind server to listener and stop on the shutdown signal
//! - Dispatch requests to the service registry
//! - Forward ordinary requests and relay the chat stream
//! - Observability (metrics, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, Method, Request},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::schema::CorsConfig;
use crate::config::GatewayConfig;
use crate::health::HealthAggregator;
use crate::http::error::GatewayError;
use crate::http::request::{request_id, MakeRequestUuid, ProxiedRequest};
use crate::lifecycle::ShutdownListener;
use crate::observability::metrics;
use crate::relay::{upstream_client, Forwarder, StreamingRelay};
use crate::resilience::TimeoutPolicy;
use crate::routing::{has_dot_segment, RegistryError, ServiceRegistry};

/// Error building the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub forwarder: Forwarder,
    pub relay: StreamingRelay,
    pub health: HealthAggregator,
    pub body_limit: usize,
}

/// The gateway's HTTP server.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
}

impl GatewayServer {
    /// Build the server from an already validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services)?);
        let policy = TimeoutPolicy::from(&config.timeouts);
        let client = upstream_client(policy.connect)?;

        let state = AppState {
            registry: registry.clone(),
            forwarder: Forwarder::new(client.clone(), policy),
            relay: StreamingRelay::new(client.clone(), policy),
            health: HealthAggregator::new(registry, client, policy.probe),
            body_limit: config.limits.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.limits.max_body_size))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            );

        if config.cors.enabled {
            router = router.layer(cors_layer(&config.cors));
        }
        router
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownListener,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.config.services.len(),
            "Gateway listening"
        );
        for service in &self.config.services {
            tracing::info!(
                service = %service.key,
                prefix = %service.route_prefix,
                upstream = %service.base_url(),
                "Route registered"
            );
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// LAN clients call from arbitrary origins and send credentials.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(config.max_age_secs))
}

/// Gateway health: always `OK`, with the per-upstream probe results.
async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.health.aggregate().await;
    let online = snapshot
        .services
        .values()
        .filter(|s| s.status.is_online())
        .count();
    tracing::debug!(online, total = snapshot.services.len(), "Health aggregated");
    Json(snapshot.document()).into_response()
}

/// Main proxy handler.
/// Looks up the service, checks the verb, and relays the request.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // 1. Match route; dot segments never reach an upstream
    if has_dot_segment(&path) {
        tracing::warn!(request_id = %request_id, method = %method, path = %path, "Rejected path with dot segments");
        metrics::record_request(method.as_str(), 400, "none", start);
        return GatewayError::MalformedRequest("path must not contain '.' or '..' segments".to_string())
            .into_response();
    }
    let Some(route) = state.registry.lookup(&path) else {
        tracing::warn!(request_id = %request_id, method = %method, path = %path, "No route matched");
        metrics::record_request(method.as_str(), 404, "none", start);
        return GatewayError::RouteNotFound {
            path,
            available: state.registry.available_routes(),
        }
        .into_response();
    };
    let service = route.service;
    let is_stream = route.is_stream();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        service = %service.display_name,
        upstream_path = %route.upstream_path,
        stream = is_stream,
        "Routing request"
    );

    // 2. Verb check, before any body is read
    if !service.allows(&method) {
        tracing::warn!(request_id = %request_id, method = %method, service = %service.key, "Method not allowed on route");
        metrics::record_request(method.as_str(), 405, &service.key, start);
        return GatewayError::UnsupportedMethod { method }.into_response();
    }

    // 3. Snapshot the request
    let proxied = match ProxiedRequest::from_request(request, route.upstream_path, state.body_limit).await {
        Ok(proxied) => proxied,
        Err(e) => {
            tracing::warn!(request_id = %request_id, service = %service.key, error = %e, "Rejected request body");
            metrics::record_request(method.as_str(), e.status().as_u16(), &service.key, start);
            return e.into_response();
        }
    };

    // 4. Relay
    let response = if is_stream {
        state
            .relay
            .relay(service, proxied, &request_id)
            .await
            .into_response()
    } else {
        match state.forwarder.forward(service, proxied).await {
            Ok(outcome) => outcome.into_response(),
            Err(e) => {
                tracing::error!(request_id = %request_id, service = %service.key, kind = e.kind(), error = %e, "Relay failed");
                e.into_response()
            }
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), &service.key, start);
    response
}
