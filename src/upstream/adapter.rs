//! Streaming upstream state machine.
//!
//! # Responsibilities
//! - Encode and write the request once the HTTP request is complete
//! - Accumulate upstream bytes and run the response decoder on each chunk
//! - Produce exactly one HTTP response, or a reset when the connection dies first
//! - Decide whether the upstream connection is closed when the request ends
//!
//! # Data Flow
//! ```text
//! send_request ─┬─ frame written to Transport
//!               └─ DeferredResponse (no bridge / conversion error)
//!                      → run_deferred (no-op once the guard is down)
//!
//! on_data(bytes, end_stream)
//!     → DubboResponse::decode
//!     → Waiting: keep buffering (or 501 if the stream ended)
//!     → Complete / error: BridgeResponse → ResponseSink
//!
//! cleanup: guard down → sink detached → transport closed if needed
//! ```
//!
//! # Design Decisions
//! - The active guard is an `Arc<AtomicBool>` shared with every deferred response
//! - Dropping the adapter runs cleanup

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::bridge::{BridgeResponse, DubboBridge, JsonRenderer, RequestSource, ResponseCodes};
use crate::bridge::response::BAD_REQUEST;
use crate::error::BridgeError;
use crate::observability::metrics;
use crate::protocol::{DecodeStatus, DubboResponse, RequestIdGenerator};

pub const NO_BRIDGE_MESSAGE: &str = "No valid dubbo conversion context for current route or request";

/// Byte stream to the Dubbo provider.
pub trait Transport: Send {
    fn write(&mut self, frame: Bytes);
    fn close(&mut self);
}

/// Downstream side receiving the final answer.
pub trait ResponseSink: Send {
    fn respond(&mut self, response: BridgeResponse);
    /// The upstream connection terminated before any response.
    fn reset(&mut self);
}

/// A response decided before touching the wire, delivered on a later turn.
#[derive(Debug)]
pub struct DeferredResponse {
    guard: Arc<AtomicBool>,
    response: BridgeResponse,
}

impl DeferredResponse {
    /// Whether the request that produced this response is still alive.
    pub fn is_active(&self) -> bool {
        self.guard.load(Ordering::Acquire)
    }

    pub fn response(&self) -> &BridgeResponse {
        &self.response
    }
}

/// Outcome of [`UpstreamAdapter::send_request`].
#[derive(Debug)]
pub enum Dispatch {
    Written { request_id: i64 },
    Deferred(DeferredResponse),
    /// Already sent, or the adapter was torn down.
    Ignored,
}

pub struct UpstreamAdapter<T: Transport, S: ResponseSink> {
    bridge: Option<DubboBridge>,
    transport: Option<T>,
    sink: Option<S>,
    ids: RequestIdGenerator,
    buffer: BytesMut,
    response: DubboResponse,
    guard: Arc<AtomicBool>,
    request_sent: bool,
    responded: bool,
    close_connection: bool,
}

impl<T: Transport, S: ResponseSink> UpstreamAdapter<T, S> {
    pub fn new(
        bridge: Option<DubboBridge>,
        transport: T,
        sink: S,
        ids: RequestIdGenerator,
    ) -> Self {
        Self {
            bridge,
            transport: Some(transport),
            sink: Some(sink),
            ids,
            buffer: BytesMut::new(),
            response: DubboResponse::new(),
            guard: Arc::new(AtomicBool::new(true)),
            request_sent: false,
            responded: false,
            close_connection: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.guard.load(Ordering::Acquire)
    }

    pub fn responded(&self) -> bool {
        self.responded
    }

    /// Whether the connection will be closed when the adapter is released.
    pub fn close_connection(&self) -> bool {
        self.close_connection || !self.responded
    }

    fn codes(&self) -> ResponseCodes {
        self.bridge
            .as_ref()
            .map(|b| *b.codes())
            .unwrap_or_default()
    }

    fn deferred(&self, message: &str) -> Dispatch {
        let response = match &self.bridge {
            Some(bridge) => BridgeResponse::local(BAD_REQUEST, message, false, bridge.renderer()),
            None => BridgeResponse::local(BAD_REQUEST, message, false, &JsonRenderer),
        };
        Dispatch::Deferred(DeferredResponse {
            guard: Arc::clone(&self.guard),
            response,
        })
    }

    /// Encode the request and write it upstream. Runs at most once.
    pub fn send_request(&mut self, source: &RequestSource) -> Dispatch {
        if self.request_sent || self.transport.is_none() {
            return Dispatch::Ignored;
        }
        self.request_sent = true;

        let Some(bridge) = &self.bridge else {
            tracing::warn!("Route has no dubbo bridge configuration");
            return self.deferred(NO_BRIDGE_MESSAGE);
        };

        match bridge.encode(source, &self.ids) {
            Ok(request) => {
                tracing::trace!(
                    request_id = request.request_id,
                    bytes = request.frame.len(),
                    "Dubbo request encoded"
                );
                if let Some(transport) = self.transport.as_mut() {
                    transport.write(request.frame);
                }
                Dispatch::Written {
                    request_id: request.request_id,
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to convert HTTP request to dubbo");
                metrics::record_protocol_error(error.kind());
                self.deferred(&error.to_string())
            }
        }
    }

    /// Deliver a deferred response unless the request was torn down meanwhile.
    pub fn run_deferred(&mut self, deferred: DeferredResponse) {
        if !deferred.is_active() || self.responded {
            tracing::debug!("Dropping deferred response for inactive request");
            return;
        }
        self.respond(deferred.response);
    }

    /// Feed bytes read from the provider.
    pub fn on_data(&mut self, data: &[u8], end_stream: bool) {
        if self.sink.is_none() || self.responded {
            return;
        }
        if data.is_empty() && !(end_stream && !self.buffer.is_empty()) {
            return;
        }

        self.buffer.extend_from_slice(data);
        let heartbeats = self.response.heartbeats();
        let result = self.response.decode(&mut self.buffer);
        metrics::record_heartbeats(self.response.heartbeats() - heartbeats);

        let codes = self.codes();
        match result {
            Ok(DecodeStatus::Waiting) if end_stream => {
                self.fail(&BridgeError::IncompleteFrame, &codes);
            }
            Ok(DecodeStatus::Waiting) => {}
            Ok(DecodeStatus::Complete) => {
                let response = match &self.bridge {
                    Some(bridge) => {
                        BridgeResponse::from_decoded(&self.response, &codes, bridge.renderer())
                    }
                    None => BridgeResponse::from_decoded(&self.response, &codes, &JsonRenderer),
                };
                if let Some(header) = self.response.header() {
                    if self.response.is_exception() {
                        tracing::warn!(
                            request_id = header.request_id,
                            status = response.status,
                            "Dubbo provider returned an exception"
                        );
                    } else {
                        tracing::trace!(
                            request_id = header.request_id,
                            status = response.status,
                            "Dubbo response decoded"
                        );
                    }
                }
                self.respond(response);
            }
            Err(error) => self.fail(&error, &codes),
        }
    }

    fn fail(&mut self, error: &BridgeError, codes: &ResponseCodes) {
        tracing::error!(error = %error, "Dubbo protocol error");
        metrics::record_protocol_error(error.kind());
        let response = match &self.bridge {
            Some(bridge) => BridgeResponse::protocol_error(error, codes, bridge.renderer()),
            None => BridgeResponse::protocol_error(error, codes, &JsonRenderer),
        };
        self.respond(response);
    }

    fn respond(&mut self, response: BridgeResponse) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        self.responded = true;
        if response.close_connection {
            self.close_connection = true;
        }
        sink.respond(response);
    }

    /// The upstream connection closed or failed.
    pub fn on_connection_closed(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        self.cleanup(false);
        if !self.responded {
            tracing::warn!("Upstream connection terminated before response");
            sink.reset();
        }
    }

    /// The downstream request was cancelled.
    pub fn reset(&mut self) {
        self.cleanup(true);
    }

    /// Lower the guard, detach the sink and release the transport.
    pub fn cleanup(&mut self, close_connection: bool) {
        self.guard.store(false, Ordering::Release);
        self.sink = None;
        if let Some(mut transport) = self.transport.take() {
            if close_connection {
                transport.close();
            }
        }
    }
}

impl<T: Transport, S: ResponseSink> Drop for UpstreamAdapter<T, S> {
    fn drop(&mut self) {
        let close = self.close_connection();
        self.cleanup(close);
    }
}
