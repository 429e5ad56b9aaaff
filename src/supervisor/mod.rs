//! Process supervision subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ports.rs (reclaim every managed port, fatal on failure)
//!     → child.rs (spawn upstreams in order, stagger between launches)
//!     → child.rs (spawn the gateway last)
//!
//! Steady state:
//!     child.rs monitor tasks → FleetEvent::Exited → fleet.rs control loop
//!     child.rs output pumps → tracing (target "fleet::child")
//!
//! Shutdown (interrupt or first unexpected exit):
//!     fleet.rs → stop children in reverse order (SIGTERM, grace, SIGKILL)
//!     → ports.rs (reclaim again, failures only logged)
//! ```

pub mod child;
pub mod fleet;
pub mod ports;

pub use child::{ChildProcessRecord, ChildState, ProcessSpec};
pub use fleet::{StopReason, Supervisor, SupervisorError, SupervisorReport};
pub use ports::{PortOwners, PortReconciler, ProcessKiller, Reclaim, ReclaimError};
