//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! and the supervisor. All types derive Serde traits for deserialization from
//! config files, and every field has a default so an empty file (or no file
//! at all) yields the stock four-service deployment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration shared by `fleet-gateway` and `fleet-supervisor`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway listener (bind address, port override).
    pub listener: ListenerConfig,

    /// Upstream services, in launch order.
    pub services: Vec<ServiceConfig>,

    /// Timeout ceilings for upstream calls.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Cross-origin settings for LAN clients.
    pub cors: CorsConfig,

    /// Fleet supervision settings.
    pub supervisor: SupervisorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            services: default_services(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            supervisor: SupervisorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The gateway's own listen port, taken from the bind address.
    pub fn gateway_port(&self) -> Option<u16> {
        self.listener
            .bind_address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Environment variable that overrides the port of `bind_address`.
    pub port_env: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            port_env: Some("GATEWAY_PORT".to_string()),
        }
    }
}

/// One upstream service behind the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service key (e.g., "main", "ai_chatbot").
    pub key: String,

    /// Human-readable name used in logs and health output.
    pub name: String,

    /// Host the upstream listens on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Upstream listen port.
    pub port: u16,

    /// Environment variable that overrides `port`, read once at startup.
    #[serde(default)]
    pub port_env: Option<String>,

    /// Inbound path prefix routed to this service (e.g., "/api/main").
    pub route_prefix: String,

    /// How the matched prefix is rewritten for the upstream.
    pub rewrite: RewriteConfig,

    /// Verbs accepted on this route.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    /// Path probed by the health aggregator.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Timeout class for non-streaming calls.
    #[serde(default)]
    pub timeout_class: TimeoutClass,

    /// Whether this service hosts the SSE endpoint.
    #[serde(default)]
    pub streaming: bool,

    /// How the supervisor launches this service. `None` means it is run externally.
    #[serde(default)]
    pub launch: Option<LaunchConfig>,
}

impl ServiceConfig {
    /// Base URL of the upstream, e.g. `http://127.0.0.1:5000`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Prefix rewrite rule for a route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteConfig {
    /// Replace the prefix with a fixed path (`/api/main/x` → `/api/x`).
    Replace { with: String },
    /// Drop the prefix; an empty remainder becomes `default_path`.
    Strip { default_path: String },
}

/// Timeout class of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    /// Ordinary API calls.
    #[default]
    Standard,
    /// POSTs invoke model inference and get the longer ceiling.
    Inference,
}

/// Child process launch description.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Program to execute. For the gateway entry, empty means the sibling
    /// `fleet-gateway` binary.
    pub program: String,

    /// Program arguments.
    pub args: Vec<String>,

    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Extra environment for the child.
    pub env: BTreeMap<String, String>,

    /// Environment variable through which the child learns its port.
    pub port_var: Option<String>,
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Default ceiling for forwarded calls in seconds.
    pub standard_secs: u64,

    /// Ceiling for calls that invoke model inference in seconds.
    pub inference_secs: u64,

    /// Ceiling for a single health probe in milliseconds.
    pub probe_ms: u64,

    /// Ceiling for opening the SSE stream, and for each idle gap within it, in seconds.
    pub stream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            standard_secs: 30,
            inference_secs: 60,
            probe_ms: 2000,
            stream_secs: 60,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound body size in bytes (uploads are buffered up to this).
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable the CORS layer.
    pub enabled: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: 3600,
        }
    }
}

/// Fleet supervision configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Pause between successive upstream launches in milliseconds.
    pub stagger_ms: u64,

    /// Pause after the initial port cleanup, before the first launch, in milliseconds.
    pub settle_ms: u64,

    /// Liveness poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Grace period per child between SIGTERM and SIGKILL in seconds.
    pub grace_period_secs: u64,

    /// Wait after terminating a port owner before re-checking, in milliseconds.
    pub reclaim_settle_ms: u64,

    /// Launch the gateway itself as the last child.
    pub launch_gateway: bool,

    /// How to launch the gateway.
    pub gateway: LaunchConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 2000,
            settle_ms: 1000,
            poll_interval_ms: 1000,
            grace_period_secs: 5,
            reclaim_settle_ms: 2000,
            launch_gateway: true,
            gateway: LaunchConfig::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string()]
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn python_launch(script: &str) -> Option<LaunchConfig> {
    Some(LaunchConfig {
        program: "python3".to_string(),
        args: vec!["-u".to_string(), script.to_string()],
        cwd: None,
        env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
        port_var: Some("PORT".to_string()),
    })
}

/// The stock deployment: primary API plus three inference services.
pub fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            key: "main".to_string(),
            name: "Main API Server".to_string(),
            host: default_host(),
            port: 5000,
            port_env: Some("MAIN_SERVICE_PORT".to_string()),
            route_prefix: "/api/main".to_string(),
            rewrite: RewriteConfig::Replace { with: "/api".to_string() },
            methods: ["GET", "POST", "PUT", "DELETE", "PATCH"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            health_path: default_health_path(),
            timeout_class: TimeoutClass::Standard,
            streaming: false,
            launch: python_launch("flask_server/app.py"),
        },
        ServiceConfig {
            key: "ai_chatbot".to_string(),
            name: "AI Chatbot Service".to_string(),
            host: default_host(),
            port: 5001,
            port_env: Some("CHATBOT_SERVICE_PORT".to_string()),
            route_prefix: "/api/ai/chat".to_string(),
            rewrite: RewriteConfig::Strip { default_path: "/chat".to_string() },
            methods: default_methods(),
            health_path: default_health_path(),
            timeout_class: TimeoutClass::Inference,
            streaming: true,
            launch: python_launch("ai_services/chatbot/app.py"),
        },
        ServiceConfig {
            key: "ai_assessment".to_string(),
            name: "Stroke Assessment Service".to_string(),
            host: default_host(),
            port: 5002,
            port_env: Some("ASSESSMENT_SERVICE_PORT".to_string()),
            route_prefix: "/api/ai/assessment".to_string(),
            rewrite: RewriteConfig::Strip { default_path: "/predict".to_string() },
            methods: default_methods(),
            health_path: default_health_path(),
            timeout_class: TimeoutClass::Standard,
            streaming: false,
            launch: python_launch("ai_services/stroke_assessment/app.py"),
        },
        ServiceConfig {
            key: "ai_image".to_string(),
            name: "Stroke Image Analysis Service".to_string(),
            host: default_host(),
            port: 5003,
            port_env: Some("IMAGE_SERVICE_PORT".to_string()),
            route_prefix: "/api/ai/image".to_string(),
            rewrite: RewriteConfig::Strip { default_path: "/analyze".to_string() },
            methods: default_methods(),
            health_path: default_health_path(),
            timeout_class: TimeoutClass::Inference,
            streaming: false,
            launch: python_launch("ai_services/stroke_image/app.py"),
        },
    ]
}
