//! Service registry: route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled service descriptors
//! - Look up the matching service for a request path
//! - Return matched route with rewritten upstream path, or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Longest prefix wins, so nested prefixes stay deterministic
//! - Explicit NoMatch rather than silent default

use axum::http::Method;
use url::Url;

use crate::config::{ServiceConfig, TimeoutClass};
use crate::routing::matcher::{PathPrefixMatcher, Rewrite};

/// Error building the registry from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service '{key}': invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        key: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("service '{key}': invalid method '{method}'")]
    InvalidMethod { key: String, method: String },
}

/// One upstream, as the gateway sees it.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub key: String,
    pub display_name: String,
    pub base_url: Url,
    pub health_path: String,
    pub methods: Vec<Method>,
    pub timeout_class: TimeoutClass,
    pub streaming: bool,
    matcher: PathPrefixMatcher,
    rewrite: Rewrite,
}

impl ServiceDescriptor {
    fn from_config(config: &ServiceConfig) -> Result<Self, RegistryError> {
        let base = config.base_url();
        let base_url = Url::parse(&base).map_err(|source| RegistryError::InvalidBaseUrl {
            key: config.key.clone(),
            url: base.clone(),
            source,
        })?;

        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                    RegistryError::InvalidMethod {
                        key: config.key.clone(),
                        method: m.clone(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            key: config.key.clone(),
            display_name: config.name.clone(),
            base_url,
            health_path: config.health_path.clone(),
            methods,
            timeout_class: config.timeout_class,
            streaming: config.streaming,
            matcher: PathPrefixMatcher::new(config.route_prefix.clone()),
            rewrite: Rewrite::from(&config.rewrite),
        })
    }

    /// Inbound prefix routed to this service.
    pub fn route_prefix(&self) -> &str {
        self.matcher.prefix()
    }

    /// Whether this route accepts `method`.
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Absolute URL of the health probe.
    pub fn health_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&self.health_path);
        url
    }

    /// Absolute upstream URL for a rewritten path and optional raw query.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }
}

/// True when `path` has a `.` or `..` segment, literal or percent-encoded.
/// The URL parser resolves these, so they could climb out of a rewrite.
pub fn has_dot_segment(path: &str) -> bool {
    path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub service: &'a ServiceDescriptor,
    pub upstream_path: String,
}

impl RouteMatch<'_> {
    /// Streaming relay applies when the service hosts the SSE endpoint and
    /// the rewritten path has a `stream` segment.
    pub fn is_stream(&self) -> bool {
        self.service.streaming && self.upstream_path.split('/').any(|segment| segment == "stream")
    }
}

/// Immutable table of upstream services.
#[derive(Debug)]
pub struct ServiceRegistry {
    /// Services in declared order.
    services: Vec<ServiceDescriptor>,
    /// Indexes into `services`, longest prefix first.
    lookup_order: Vec<usize>,
}

impl ServiceRegistry {
    /// Compile the registry. Expects an already validated configuration.
    pub fn from_config(configs: &[ServiceConfig]) -> Result<Self, RegistryError> {
        let services = configs
            .iter()
            .map(ServiceDescriptor::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let mut lookup_order: Vec<usize> = (0..services.len()).collect();
        lookup_order.sort_by_key(|&i| std::cmp::Reverse(services[i].route_prefix().len()));

        Ok(Self {
            services,
            lookup_order,
        })
    }

    /// Find the service for `path` and rewrite it for the upstream.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.lookup_order.iter().find_map(|&i| {
            let service = &self.services[i];
            service.matcher.remainder(path).map(|rest| RouteMatch {
                service,
                upstream_path: service.rewrite.apply(rest),
            })
        })
    }

    /// Look up a service by key.
    pub fn get(&self, key: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.key == key)
    }

    /// All services in declared order.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Route patterns, for 404 responses.
    pub fn available_routes(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| format!("{}/*", s.route_prefix()))
            .collect()
    }
}
