//! HTTP/JSON ↔ Dubbo generic invocation.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     RequestSource (headers, query, body)
//!     → route.rs (static context, or one built from headers by bff.rs)
//!     → source.rs / anyway.rs / bff.rs (argument provider per parameter)
//!     → convert.rs (JSON → value tree by declared Java type)
//!     → generic.rs (`class` annotations)
//!     → context.rs (`$invoke` body + attachments, framed)
//!
//! Response path:
//!     DubboResponse (decoded by protocol::codec)
//!     → serialize.rs (value tree → JSON)
//!     → response.rs (status mapping)
//!     → renderer (plain JSON, anyway or BFF envelope)
//! ```

pub mod anyway;
pub mod bff;
pub mod context;
pub mod convert;
pub mod generic;
pub mod response;
pub mod route;
pub mod serialize;
pub mod source;

pub use anyway::{AnywayArguments, AnywayRenderer};
pub use bff::{BffArguments, BffRenderer, HeaderContext};
pub use context::{BridgeContext, EncodedRequest, Parameter};
pub use generic::GenericType;
pub use response::{
    BridgeResponse, JsonRenderer, Rendered, ResponseCodes, ResponseKind,
    ResponseRenderer,
};
pub use route::DubboBridge;
pub use source::{ArgumentProvider, RequestSource};
