//! fleet-gateway: HTTP gateway and process supervisor for a small fleet of
//! upstream services.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod routing;
pub mod supervisor;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use supervisor::Supervisor;
