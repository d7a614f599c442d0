//! Hessian2 serialization subsystem.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     ValueTree (built from JSON)
//!     → encoder.rs (compact Hessian2 forms)
//!     → request body bytes
//!
//! Response path:
//!     response body bytes
//!     → decoder.rs (type/class/ref tables, offset tracking)
//!     → ValueTree (owned by the decoded response)
//! ```
//!
//! # Design Decisions
//! - Only the subset of Hessian2 needed for generic invocation is implemented, but every
//!   value form a Dubbo provider may send back is readable
//! - Decoding never reads past the slice it was given and reports how much it consumed
//! - Nesting depth is bounded so hostile payloads cannot exhaust the stack

pub mod decoder;
pub mod encoder;
pub mod value;

pub use decoder::{Decoder, HessianError};
pub use encoder::Encoder;
pub use value::{ClassDef, NodeId, Value, ValueTree};
