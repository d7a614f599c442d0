//! Request framing and the incremental response decoder.
//!
//! # Data Flow
//! ```text
//! accumulated upstream bytes
//!     → decode_header (once per frame)
//!     → heartbeat frames drained in a loop
//!     → header drained, status checked
//!     → response type tag + optional value decoded
//!     → consumed bytes checked against declared body size
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{Decoder, ValueTree};
use crate::protocol::header::{
    decode_header, FrameHeader, MessageType, ResponseStatus, HEADER_SIZE, MAGIC, REQUEST_FLAG,
};

/// Result of one decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// More bytes are needed before the frame can be decoded.
    Waiting,
    /// A complete response frame was decoded.
    Complete,
}

/// Response type tag written by providers after an OK header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    WithException,
    WithValue,
    WithNullValue,
    WithExceptionWithAttachments,
    ValueWithAttachments,
    NullValueWithAttachments,
}

impl ResponseType {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ResponseType::WithException,
            1 => ResponseType::WithValue,
            2 => ResponseType::WithNullValue,
            3 => ResponseType::WithExceptionWithAttachments,
            4 => ResponseType::ValueWithAttachments,
            5 => ResponseType::NullValueWithAttachments,
            _ => return None,
        })
    }

    fn has_value(self) -> bool {
        !matches!(
            self,
            ResponseType::WithNullValue | ResponseType::NullValueWithAttachments
        )
    }

    fn has_exception(self) -> bool {
        matches!(
            self,
            ResponseType::WithException | ResponseType::WithExceptionWithAttachments
        )
    }
}

/// Wrap a request body produced by `write_body` into a complete frame.
///
/// The body is written to a scratch buffer first so its length can go into the header.
pub fn write_request_frame<F>(out: &mut BytesMut, request_id: i64, write_body: F) -> BridgeResult<()>
where
    F: FnOnce(&mut BytesMut) -> BridgeResult<()>,
{
    let mut body = BytesMut::new();
    write_body(&mut body)?;

    out.reserve(HEADER_SIZE + body.len());
    out.put_u16(MAGIC);
    out.put_u8(REQUEST_FLAG);
    out.put_u8(0);
    out.put_i64(request_id);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    Ok(())
}

/// State of the response currently being decoded from one upstream connection.
#[derive(Debug, Default)]
pub struct DubboResponse {
    header: Option<FrameHeader>,
    value: Option<ValueTree>,
    is_exception: bool,
    close_connection: bool,
    heartbeats: u64,
}

impl DubboResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    pub fn value(&self) -> Option<&ValueTree> {
        self.value.as_ref()
    }

    pub fn take_value(&mut self) -> Option<ValueTree> {
        self.value.take()
    }

    pub fn is_exception(&self) -> bool {
        self.is_exception
    }

    /// Set when the provider answered with a non-OK status.
    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// Heartbeat frames absorbed so far.
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Forget the current frame. The heartbeat count is kept.
    pub fn reset(&mut self) {
        self.header = None;
        self.value = None;
        self.is_exception = false;
        self.close_connection = false;
    }

    /// Try to decode one response frame from the front of `buffer`.
    ///
    /// Consumed frames are drained from `buffer`. Call [`DubboResponse::reset`] before
    /// decoding a further frame with the same state.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> BridgeResult<DecodeStatus> {
        if self.header.is_none() {
            self.header = decode_header(&buffer[..])?;
        }
        let Some(mut header) = self.header else {
            return Ok(DecodeStatus::Waiting);
        };
        if buffer.len() < header.frame_len() {
            return Ok(DecodeStatus::Waiting);
        }

        while header.message_type.is_heartbeat() {
            tracing::debug!(
                request_id = header.request_id,
                "Heartbeat frame from dubbo provider"
            );
            buffer.advance(header.frame_len());
            self.reset();
            self.heartbeats += 1;

            match decode_header(&buffer[..])? {
                Some(next) => {
                    self.header = Some(next);
                    header = next;
                }
                None => return Ok(DecodeStatus::Waiting),
            }
            if buffer.len() < header.frame_len() {
                return Ok(DecodeStatus::Waiting);
            }
        }

        if header.message_type != MessageType::Response {
            tracing::error!(
                request_id = header.request_id,
                message_type = ?header.message_type,
                "Unexpected frame from dubbo provider"
            );
            return Err(BridgeError::UnexpectedMessage(header.message_type));
        }

        buffer.advance(HEADER_SIZE);
        let result = self.decode_body(&buffer[..], &header);
        buffer.advance((header.body_size as usize).min(buffer.len()));
        result.map(|_| DecodeStatus::Complete)
    }

    /// Decode against everything buffered so an overrun of the declared size is detectable.
    fn decode_body(&mut self, body: &[u8], header: &FrameHeader) -> BridgeResult<()> {
        let mut decoder = Decoder::new(body);

        if let Some(status) = header.response_status.filter(|s| *s != ResponseStatus::Ok) {
            tracing::warn!(
                request_id = header.request_id,
                status = status.code(),
                "Dubbo provider answered with error status"
            );
            let value = decoder.read_tree()?;
            check_consumed(decoder.offset(), header.body_size)?;
            self.value = Some(value);
            self.is_exception = true;
            self.close_connection = true;
            return Ok(());
        }

        let code = decoder
            .read_int()
            .map_err(|_| BridgeError::MissingResponseType)?;
        let response_type =
            ResponseType::from_code(code).ok_or(BridgeError::UnsupportedResponseType(code))?;

        if response_type.has_value() {
            tracing::trace!(request_id = header.request_id, "Decoding response value");
            self.value = Some(decoder.read_tree()?);
            self.is_exception = response_type.has_exception();
        }

        check_consumed(decoder.offset(), header.body_size)
    }
}

fn check_consumed(consumed: usize, body_size: u32) -> BridgeResult<()> {
    if consumed > body_size as usize {
        return Err(BridgeError::ResultTooLarge {
            consumed,
            body_size,
        });
    }
    Ok(())
}
