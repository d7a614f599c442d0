//! Bridge error types.
//!
//! # Design Decisions
//! - One enum for every failure the bridge can surface, so callers map errors to
//!   HTTP responses in a single place
//! - Messages are user visible; they are returned as response bodies
//! - Fatal kinds (see [`BridgeError::is_fatal`]) require closing the upstream connection

use thiserror::Error;

use crate::hessian::HessianError;
use crate::protocol::header::{FrameError, MessageType};

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A JSON value does not satisfy the coercion rules of its declared type.
    #[error("Dubbo bridge: value '{raw}' is invalid for current type")]
    InvalidValue { type_name: String, raw: String },

    #[error("Dubbo bridge: {index}/{name}/{type_name} is required but not provided")]
    MissingRequiredParameter {
        index: usize,
        name: String,
        type_name: String,
    },

    /// Raised while compiling a route, never per request.
    #[error("Dubbo bridge: default value: {name}/{type_name} of {raw} is invalid Json")]
    InvalidDefaultJson {
        name: String,
        type_name: String,
        raw: String,
    },

    /// The HTTP request cannot supply arguments (bad body, bad query).
    #[error("Dubbo bridge: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    MalformedFrame(#[from] FrameError),

    #[error("RpcResult size({consumed}) large than body size({body_size})")]
    ResultTooLarge { consumed: usize, body_size: u32 },

    #[error("not supported return type {0}")]
    UnsupportedResponseType(i32),

    #[error("Expected response message but get {}", .0.code())]
    UnexpectedMessage(MessageType),

    #[error("No response type get from dubbo response and do nothing")]
    MissingResponseType,

    #[error("More data is necessary for upstream but end stream")]
    IncompleteFrame,

    #[error("Unknown type definition for: {0}")]
    UnknownTypeDefinition(String),

    #[error("Expected fields size: 1 but actual fields size: {actual} for {type_name}")]
    FieldCountMismatch { type_name: String, actual: usize },

    #[error(transparent)]
    Hessian(#[from] HessianError),
}

impl BridgeError {
    /// Whether the upstream connection can no longer be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::MalformedFrame(_)
                | BridgeError::ResultTooLarge { .. }
                | BridgeError::UnsupportedResponseType(_)
                | BridgeError::UnexpectedMessage(_)
                | BridgeError::MissingResponseType
                | BridgeError::IncompleteFrame
                | BridgeError::Hessian(_)
        )
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidValue { .. } => "invalid_value",
            BridgeError::MissingRequiredParameter { .. } => "missing_parameter",
            BridgeError::InvalidDefaultJson { .. } => "invalid_default",
            BridgeError::InvalidArguments(_) => "invalid_arguments",
            BridgeError::MalformedFrame(_) => "malformed_frame",
            BridgeError::ResultTooLarge { .. } => "result_too_large",
            BridgeError::UnsupportedResponseType(_) => "unsupported_response_type",
            BridgeError::UnexpectedMessage(_) => "unexpected_message",
            BridgeError::MissingResponseType => "missing_response_type",
            BridgeError::IncompleteFrame => "incomplete_frame",
            BridgeError::UnknownTypeDefinition(_) => "unknown_type_definition",
            BridgeError::FieldCountMismatch { .. } => "field_count_mismatch",
            BridgeError::Hessian(_) => "hessian",
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
