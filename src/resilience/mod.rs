//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (pick connect/request/probe/stream ceiling)
//!     → On failure: http/error.rs maps the transport fault to 503/504/500
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No retries: a failed relay is reported, never replayed

pub mod timeouts;

pub use timeouts::TimeoutPolicy;
