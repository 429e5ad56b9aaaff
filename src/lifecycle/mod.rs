//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Interrupt event on a channel
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Running → ShuttingDown → Stopped
//!     Listeners (server, supervisor tasks) stop accepting work
//! ```
//!
//! # Design Decisions
//! - Repeated signals are harmless: only the first trigger counts
//! - Ordered shutdown: stop accept, drain, close

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownListener, ShutdownPhase};
pub use signals::Interrupt;
