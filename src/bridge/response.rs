//! Turning decoded provider responses and local failures into HTTP responses.

use bytes::Bytes;

use crate::bridge::serialize::{push_json_str, to_json_string};
use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{Value, ValueTree};
use crate::protocol::DubboResponse;

/// What a rendered payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Value,
    /// A provider exception, or a failure while talking to the provider.
    Exception,
    /// A message produced by the bridge itself.
    Local,
}

/// Body produced by a [`ResponseRenderer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub body: Bytes,
    /// Replaces the configured status for this outcome when set.
    pub status: Option<u16>,
}

impl Rendered {
    pub fn body(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            status: None,
        }
    }

    pub fn with_status(body: impl Into<Bytes>, status: u16) -> Self {
        Self {
            body: body.into(),
            status: Some(status),
        }
    }
}

/// Renders response payloads into HTTP bodies.
pub trait ResponseRenderer: Send + Sync {
    /// `value` is `None` when the provider returned no value.
    fn render(&self, value: Option<&ValueTree>, kind: ResponseKind) -> BridgeResult<Rendered>;
}

/// Renders every payload as JSON. A missing value gives an empty body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl ResponseRenderer for JsonRenderer {
    fn render(&self, value: Option<&ValueTree>, _kind: ResponseKind) -> BridgeResult<Rendered> {
        match value {
            Some(tree) => Ok(Rendered::body(to_json_string(tree)?)),
            None => Ok(Rendered::body(Bytes::new())),
        }
    }
}

/// HTTP statuses used for each outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCodes {
    pub success: u16,
    pub exception: u16,
    pub protocol_error: u16,
}

impl Default for ResponseCodes {
    fn default() -> Self {
        Self {
            success: 200,
            exception: 503,
            protocol_error: 501,
        }
    }
}

/// Status code used for requests that cannot be converted.
pub const BAD_REQUEST: u16 = 400;

/// Final HTTP answer for one bridged request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResponse {
    pub status: u16,
    pub body: Bytes,
    /// The upstream connection must not be reused.
    pub close_connection: bool,
}

impl BridgeResponse {
    fn message(
        status: u16,
        kind: ResponseKind,
        message: &str,
        close_connection: bool,
        renderer: &dyn ResponseRenderer,
    ) -> Self {
        let tree = ValueTree::scalar(Value::String(message.to_string()));
        let rendered = renderer.render(Some(&tree), kind).unwrap_or_else(|_| {
            let mut quoted = String::new();
            push_json_str(&mut quoted, message);
            Rendered::body(quoted)
        });
        Self {
            status: rendered.status.unwrap_or(status),
            body: rendered.body,
            close_connection,
        }
    }

    /// A bridge-generated message, rendered like a string payload.
    pub fn local(
        status: u16,
        message: &str,
        close_connection: bool,
        renderer: &dyn ResponseRenderer,
    ) -> Self {
        Self::message(status, ResponseKind::Local, message, close_connection, renderer)
    }

    /// A failure while talking to the provider. The connection is closed.
    pub fn protocol_error(
        error: &BridgeError,
        codes: &ResponseCodes,
        renderer: &dyn ResponseRenderer,
    ) -> Self {
        Self::message(
            codes.protocol_error,
            ResponseKind::Exception,
            &error.to_string(),
            true,
            renderer,
        )
    }

    /// Map a completely decoded provider response.
    pub fn from_decoded(
        response: &DubboResponse,
        codes: &ResponseCodes,
        renderer: &dyn ResponseRenderer,
    ) -> Self {
        let (status, kind, close) = if response.close_connection() {
            (codes.protocol_error, ResponseKind::Exception, true)
        } else if response.is_exception() {
            (codes.exception, ResponseKind::Exception, false)
        } else {
            (codes.success, ResponseKind::Value, false)
        };

        match renderer.render(response.value(), kind) {
            Ok(rendered) => Self {
                status: rendered.status.unwrap_or(status),
                body: rendered.body,
                close_connection: close,
            },
            Err(error) => {
                tracing::error!(error = %error, "Failed to render dubbo response");
                Self::protocol_error(&error, codes, renderer)
            }
        }
    }
}
