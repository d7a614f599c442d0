//! HTTP gateway subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (request ID)
//!     → server.rs (trace span, body limit, route lookup)
//!     → upstream (bridged Dubbo call)
//!     → JSON response
//! ```

pub mod request;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{spawn_reloader, AppState, HttpServer, SharedRoutes};
