//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (request ID, body kind, header filtering)
//!     → [routing layer picks the service]
//!     → [relay layer calls the upstream]
//!     → response.rs (mirror status/headers, strip hop-by-hop)
//!     → error.rs (gateway-made failures as JSON)
//!     → Send to client
//! ```

pub mod error;
pub mod request;
pub mod response;
pub mod server;

pub use error::GatewayError;
pub use request::{ProxiedRequest, RequestBody, X_REQUEST_ID};
pub use response::{RelayBody, RelayOutcome};
pub use server::{GatewayServer, ServerError};
