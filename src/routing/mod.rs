//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (service lookup, longest prefix first)
//!     → matcher.rs (segment-aware prefix match, rewrite)
//!     → Return: matched service + upstream path, or NoMatch
//!
//! Registry Compilation (at startup):
//!     ServiceConfig[]
//!     → Parse base URLs and verbs
//!     → Compile matchers and rewrite rules
//!     → Freeze as immutable ServiceRegistry
//! ```
//!
//! # Design Decisions
//! - Registry compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same service

pub mod matcher;
pub mod router;

pub use router::{has_dot_segment, RegistryError, RouteMatch, ServiceDescriptor, ServiceRegistry};
