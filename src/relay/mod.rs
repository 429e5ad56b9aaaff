//! Upstream relay subsystem.
//!
//! # Data Flow
//! ```text
//! ProxiedRequest + ServiceDescriptor
//!     → forwarder.rs (ordinary call, buffered answer, per-request ceiling)
//!     → streaming.rs (SSE route: frame-by-frame relay with idle ceiling)
//!         → sse.rs (frame splitting, marker detection, local frames)
//!     → RelayOutcome (status + headers + full body or byte stream)
//! ```
//!
//! # Design Decisions
//! - Both paths share one `reqwest::Client`
//! - Upstream statuses are mirrored; only transport faults become gateway errors

pub mod forwarder;
pub mod sse;
pub mod streaming;

pub use forwarder::{upstream_client, Forwarder};
pub use streaming::{RelayState, StreamingRelay};
