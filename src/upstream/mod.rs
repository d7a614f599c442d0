//! Upstream subsystem: talking to Dubbo providers.
//!
//! # Data Flow
//! ```text
//! RequestSource + DubboBridge
//!     → tcp.rs (connect, drive the exchange under timeouts)
//!     → adapter.rs (encode, buffer, decode, answer once)
//!     → BridgeResponse or UpstreamError
//! ```
//!
//! # Design Decisions
//! - One connection per request; it is closed when the call ends
//! - The adapter is synchronous so its state machine can be tested without sockets

pub mod adapter;
pub mod tcp;

pub use adapter::{DeferredResponse, Dispatch, ResponseSink, Transport, UpstreamAdapter};
pub use tcp::{invoke, UpstreamError, UpstreamTimeouts};
