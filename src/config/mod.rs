//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, else built-in defaults)
//!     → loader.rs (port overrides from environment, read once)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared by reference with all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::GatewayConfig;
pub use schema::LaunchConfig;
pub use schema::ListenerConfig;
pub use schema::RewriteConfig;
pub use schema::ServiceConfig;
pub use schema::SupervisorConfig;
pub use schema::TimeoutClass;
pub use schema::TimeoutConfig;
