//! Dubbo wire protocol.
//!
//! # Responsibilities
//! - Fixed 16-byte frame header encode/decode
//! - Request framing with back-filled body length
//! - Incremental response decoding with heartbeat absorption
//! - Request id generation

pub mod codec;
pub mod header;
pub mod request_id;

pub use codec::{write_request_frame, DecodeStatus, DubboResponse, ResponseType};
pub use header::{FrameError, FrameHeader, MessageType, ResponseStatus};
pub use request_id::RequestIdGenerator;
