//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check service keys are unique
//! - Validate route prefixes and detect ambiguous routes
//! - Validate value ranges (timeouts > 0, poll interval > 0, ports valid, known verbs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GatewayConfig, RewriteConfig};

/// Verbs the forwarder knows how to relay.
pub const RELAYABLE_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NoServices,
    DuplicateKey(String),
    DuplicatePrefix { prefix: String, first: String, second: String },
    InvalidPrefix { key: String, prefix: String },
    ReservedPrefix { key: String },
    InvalidRewrite { key: String, path: String },
    InvalidHealthPath { key: String, path: String },
    UnknownMethod { key: String, method: String },
    ZeroPort { key: String },
    InvalidBindAddress(String),
    ZeroTimeout(&'static str),
    ZeroPollInterval,
    LaunchWithoutProgram { key: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NoServices => write!(f, "no services configured"),
            ValidationError::DuplicateKey(key) => write!(f, "duplicate service key '{}'", key),
            ValidationError::DuplicatePrefix { prefix, first, second } => write!(
                f,
                "route prefix '{}' is claimed by both '{}' and '{}'",
                prefix, first, second
            ),
            ValidationError::InvalidPrefix { key, prefix } => write!(
                f,
                "service '{}': route prefix '{}' must start with '/' and not end with '/'",
                key, prefix
            ),
            ValidationError::ReservedPrefix { key } => {
                write!(f, "service '{}': '/health' is reserved for the gateway", key)
            }
            ValidationError::InvalidRewrite { key, path } => write!(
                f,
                "service '{}': rewrite path '{}' must start with '/'",
                key, path
            ),
            ValidationError::InvalidHealthPath { key, path } => write!(
                f,
                "service '{}': health path '{}' must start with '/'",
                key, path
            ),
            ValidationError::UnknownMethod { key, method } => {
                write!(f, "service '{}': method '{}' cannot be relayed", key, method)
            }
            ValidationError::ZeroPort { key } => write!(f, "service '{}': port must be non-zero", key),
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "listener bind address '{}' is not host:port", addr)
            }
            ValidationError::ZeroTimeout(name) => write!(f, "timeout '{}' must be non-zero", name),
            ValidationError::ZeroPollInterval => {
                write!(f, "supervisor poll_interval_ms must be non-zero")
            }
            ValidationError::LaunchWithoutProgram { key } => {
                write!(f, "service '{}': launch entry has no program", key)
            }
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.services.is_empty() {
        errors.push(ValidationError::NoServices);
    }

    if config.gateway_port().is_none() {
        errors.push(ValidationError::InvalidBindAddress(config.listener.bind_address.clone()));
    }

    let t = &config.timeouts;
    for (name, value) in [
        ("connect_secs", t.connect_secs),
        ("standard_secs", t.standard_secs),
        ("inference_secs", t.inference_secs),
        ("probe_ms", t.probe_ms),
        ("stream_secs", t.stream_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.supervisor.poll_interval_ms == 0 {
        errors.push(ValidationError::ZeroPollInterval);
    }

    let mut keys = HashSet::new();
    let mut prefixes: Vec<(&str, &str)> = Vec::new();

    for service in &config.services {
        let key = service.key.clone();

        if !keys.insert(service.key.as_str()) {
            errors.push(ValidationError::DuplicateKey(key.clone()));
        }

        if service.port == 0 {
            errors.push(ValidationError::ZeroPort { key: key.clone() });
        }

        let prefix = service.route_prefix.as_str();
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                key: key.clone(),
                prefix: prefix.to_string(),
            });
        } else if prefix == "/health" || prefix.starts_with("/health/") {
            errors.push(ValidationError::ReservedPrefix { key: key.clone() });
        }

        if let Some((_, first)) = prefixes.iter().find(|(p, _)| *p == prefix) {
            errors.push(ValidationError::DuplicatePrefix {
                prefix: prefix.to_string(),
                first: first.to_string(),
                second: key.clone(),
            });
        } else {
            prefixes.push((prefix, service.key.as_str()));
        }

        let rewrite_path = match &service.rewrite {
            RewriteConfig::Replace { with } => with,
            RewriteConfig::Strip { default_path } => default_path,
        };
        if !rewrite_path.starts_with('/') {
            errors.push(ValidationError::InvalidRewrite {
                key: key.clone(),
                path: rewrite_path.clone(),
            });
        }

        if !service.health_path.starts_with('/') {
            errors.push(ValidationError::InvalidHealthPath {
                key: key.clone(),
                path: service.health_path.clone(),
            });
        }

        for method in &service.methods {
            let upper = method.to_ascii_uppercase();
            if !RELAYABLE_METHODS.contains(&upper.as_str()) {
                errors.push(ValidationError::UnknownMethod {
                    key: key.clone(),
                    method: method.clone(),
                });
            }
        }

        if let Some(launch) = &service.launch {
            if launch.program.trim().is_empty() {
                errors.push(ValidationError::LaunchWithoutProgram { key });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
