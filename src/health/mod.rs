//! Health aggregation subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health
//!     → active.rs (probe every upstream, fanned out, each time-boxed)
//!     → state.rs (online | error | offline per service)
//!     → {"gateway": "OK", "timestamp", "services": {...}}
//! ```
//!
//! # Design Decisions
//! - The gateway is "up" if it can answer at all
//! - Health state is per-service and recomputed on every query

pub mod active;
pub mod state;

pub use active::HealthAggregator;
pub use state::{GatewayHealth, HealthSnapshot, ServiceHealth, ServiceState};
