//! Dubbo frame header.
//!
//! ```text
//! 0      2      3      4                      12           16
//! +------+------+------+----------------------+------------+
//! | magic| flag |status|   request id (i64)   | body (u32) |
//! +------+------+------+----------------------+------------+
//! flag: 0x80 request | 0x40 two-way | 0x20 event | low 5 bits serialization id
//! ```

use bytes::{BufMut, BytesMut};
use thiserror::Error;

pub const MAGIC: u16 = 0xdabb;
pub const HEADER_SIZE: usize = 16;
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

const FLAG_REQUEST: u8 = 0x80;
const FLAG_TWO_WAY: u8 = 0x40;
const FLAG_EVENT: u8 = 0x20;
const SERIALIZATION_MASK: u8 = 0x1f;

/// Serialization id of Hessian2, the only one the bridge speaks.
pub const HESSIAN2_SERIALIZATION: u8 = 2;

/// Flag byte of a two-way Hessian2 request.
pub const REQUEST_FLAG: u8 = FLAG_REQUEST | FLAG_TWO_WAY | HESSIAN2_SERIALIZATION;

/// Header-level framing failures. All of them close the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid dubbo message magic number {0}")]
    Magic(u16),

    #[error("invalid dubbo message serialization type {0}")]
    Serialization(u8),

    #[error("invalid dubbo message response status {0}")]
    Status(u8),

    #[error("invalid dubbo message size {0}")]
    BodySize(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Oneway,
    Exception,
    HeartbeatRequest,
    HeartbeatResponse,
}

impl MessageType {
    /// Numeric code used in diagnostics.
    pub fn code(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Oneway => 2,
            MessageType::Exception => 3,
            MessageType::HeartbeatRequest => 4,
            MessageType::HeartbeatResponse => 5,
        }
    }

    pub fn is_heartbeat(self) -> bool {
        matches!(
            self,
            MessageType::HeartbeatRequest | MessageType::HeartbeatResponse
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    ClientTimeout,
    ServerTimeout,
    BadRequest,
    BadResponse,
    ServiceNotFound,
    ServiceError,
    ServerError,
    ClientError,
    ServerThreadpoolExhausted,
}

impl ResponseStatus {
    pub fn code(self) -> u8 {
        match self {
            ResponseStatus::Ok => 20,
            ResponseStatus::ClientTimeout => 30,
            ResponseStatus::ServerTimeout => 31,
            ResponseStatus::BadRequest => 40,
            ResponseStatus::BadResponse => 50,
            ResponseStatus::ServiceNotFound => 60,
            ResponseStatus::ServiceError => 70,
            ResponseStatus::ServerError => 80,
            ResponseStatus::ClientError => 90,
            ResponseStatus::ServerThreadpoolExhausted => 100,
        }
    }
}

impl TryFrom<u8> for ResponseStatus {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            20 => ResponseStatus::Ok,
            30 => ResponseStatus::ClientTimeout,
            31 => ResponseStatus::ServerTimeout,
            40 => ResponseStatus::BadRequest,
            50 => ResponseStatus::BadResponse,
            60 => ResponseStatus::ServiceNotFound,
            70 => ResponseStatus::ServiceError,
            80 => ResponseStatus::ServerError,
            90 => ResponseStatus::ClientError,
            100 => ResponseStatus::ServerThreadpoolExhausted,
            other => return Err(FrameError::Status(other)),
        })
    }
}

/// Decoded fixed header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub request_id: i64,
    pub message_type: MessageType,
    pub body_size: u32,
    /// Only present on response frames.
    pub response_status: Option<ResponseStatus>,
}

impl FrameHeader {
    /// Total frame length, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.body_size as usize
    }
}

/// Decode a header from the front of `buf`. `Ok(None)` means fewer than 16 bytes.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
    let Some(header) = buf.get(..HEADER_SIZE) else {
        return Ok(None);
    };

    let magic = u16::from_be_bytes([header[0], header[1]]);
    if magic != MAGIC {
        return Err(FrameError::Magic(magic));
    }

    let flag = header[2];
    let serialization = flag & SERIALIZATION_MASK;
    if serialization != HESSIAN2_SERIALIZATION {
        return Err(FrameError::Serialization(serialization));
    }

    let mut id = [0u8; 8];
    id.copy_from_slice(&header[4..12]);
    let request_id = i64::from_be_bytes(id);

    let body_size = i32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    if body_size < 0 || body_size as u32 > MAX_BODY_SIZE {
        return Err(FrameError::BodySize(body_size as i64));
    }

    let is_event = flag & FLAG_EVENT != 0;
    let (message_type, response_status) = if flag & FLAG_REQUEST != 0 {
        let message_type = if is_event {
            MessageType::HeartbeatRequest
        } else if flag & FLAG_TWO_WAY != 0 {
            MessageType::Request
        } else {
            MessageType::Oneway
        };
        (message_type, None)
    } else {
        let status = ResponseStatus::try_from(header[3])?;
        let message_type = if is_event {
            MessageType::HeartbeatResponse
        } else {
            MessageType::Response
        };
        (message_type, Some(status))
    };

    Ok(Some(FrameHeader {
        request_id,
        message_type,
        body_size: body_size as u32,
        response_status,
    }))
}

/// Append a response header. Used by tests and mock providers.
pub fn encode_response_header(
    buf: &mut BytesMut,
    request_id: i64,
    status: ResponseStatus,
    heartbeat: bool,
    body_size: u32,
) {
    buf.put_u16(MAGIC);
    let mut flag = HESSIAN2_SERIALIZATION;
    if heartbeat {
        flag |= FLAG_EVENT;
    }
    buf.put_u8(flag);
    buf.put_u8(status.code());
    buf.put_i64(request_id);
    buf.put_u32(body_size);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flag: u8, status: u8, body: u32) -> Vec<u8> {
        let mut buf = vec![0xda, 0xbb, flag, status];
        buf.extend_from_slice(&7i64.to_be_bytes());
        buf.extend_from_slice(&body.to_be_bytes());
        buf
    }

    #[test]
    fn short_buffer_waits() {
        assert_eq!(decode_header(&[0xda, 0xbb, 0x02]).unwrap(), None);
    }

    #[test]
    fn bad_magic_is_fatal_regardless_of_rest() {
        let mut buf = header(0x02, 20, 0);
        buf[0] = 0x00;
        assert_eq!(decode_header(&buf), Err(FrameError::Magic(0x00bb)));
        assert_eq!(
            FrameError::Magic(0x00bb).to_string(),
            "invalid dubbo message magic number 187"
        );
    }

    #[test]
    fn rejects_other_serializations() {
        let buf = header(0x06, 20, 0);
        assert_eq!(decode_header(&buf), Err(FrameError::Serialization(6)));
    }

    #[test]
    fn rejects_unknown_response_status() {
        let buf = header(0x02, 21, 0);
        assert_eq!(decode_header(&buf), Err(FrameError::Status(21)));
    }

    #[test]
    fn request_frames_ignore_status_byte() {
        let buf = header(REQUEST_FLAG, 0, 4);
        let decoded = decode_header(&buf).unwrap().unwrap();
        assert_eq!(decoded.message_type, MessageType::Request);
        assert_eq!(decoded.response_status, None);
        assert_eq!(decoded.body_size, 4);
        assert_eq!(decoded.request_id, 7);
    }

    #[test]
    fn classifies_message_types() {
        let kind = |flag| decode_header(&header(flag, 20, 0)).unwrap().unwrap().message_type;
        assert_eq!(kind(0x02), MessageType::Response);
        assert_eq!(kind(0x22), MessageType::HeartbeatResponse);
        assert_eq!(kind(0x82), MessageType::Oneway);
        assert_eq!(kind(0xe2), MessageType::HeartbeatRequest);
    }

    #[test]
    fn rejects_oversized_body() {
        let buf = header(0x02, 20, MAX_BODY_SIZE + 1);
        assert_eq!(
            decode_header(&buf),
            Err(FrameError::BodySize(MAX_BODY_SIZE as i64 + 1))
        );
    }

    #[test]
    fn encoded_response_header_decodes() {
        let mut buf = BytesMut::new();
        encode_response_header(&mut buf, 42, ResponseStatus::ServiceError, false, 9);
        let decoded = decode_header(&buf).unwrap().unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.response_status, Some(ResponseStatus::ServiceError));
        assert_eq!(decoded.frame_len(), 25);
    }
}
