//! One bridged call over a fresh TCP connection to a Dubbo provider.
//!
//! The [`UpstreamAdapter`] is synchronous. This module drives it from a tokio
//! task: transport commands and the final response come back over channels
//! and are acted on between socket reads.

use std::time::Duration;

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::bridge::{BridgeResponse, DubboBridge, RequestSource};
use crate::config::schema::TimeoutConfig;
use crate::protocol::RequestIdGenerator;
use crate::upstream::adapter::{Dispatch, ResponseSink, Transport, UpstreamAdapter};

const READ_CHUNK: usize = 8 * 1024;

/// Deadlines for one upstream call.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl From<&TimeoutConfig> for UpstreamTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            request: Duration::from_secs(config.request_secs),
        }
    }
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// Failures that happen before the bridge could produce a response.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] std::io::Error),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream connection terminated before response")]
    Reset,
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Connect(_) => StatusCode::BAD_GATEWAY,
            UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Reset => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

enum TransportCommand {
    Write(Bytes),
    Close,
}

struct ChannelTransport(mpsc::UnboundedSender<TransportCommand>);

impl Transport for ChannelTransport {
    fn write(&mut self, frame: Bytes) {
        let _ = self.0.send(TransportCommand::Write(frame));
    }

    fn close(&mut self) {
        let _ = self.0.send(TransportCommand::Close);
    }
}

enum SinkEvent {
    Response(BridgeResponse),
    Reset,
}

struct ChannelSink(Option<oneshot::Sender<SinkEvent>>);

impl ChannelSink {
    fn send(&mut self, event: SinkEvent) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(event);
        }
    }
}

impl ResponseSink for ChannelSink {
    fn respond(&mut self, response: BridgeResponse) {
        self.send(SinkEvent::Response(response));
    }

    fn reset(&mut self) {
        self.send(SinkEvent::Reset);
    }
}

type ChannelAdapter = UpstreamAdapter<ChannelTransport, ChannelSink>;

/// Send one request to `addr` and wait for the bridged answer.
///
/// A missing `bridge` still connects; the request is then answered with 400.
pub async fn invoke(
    addr: &str,
    bridge: Option<DubboBridge>,
    source: &RequestSource,
    timeouts: UpstreamTimeouts,
) -> Result<BridgeResponse, UpstreamError> {
    let mut stream = match tokio::time::timeout(timeouts.connect, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(upstream = %addr, error = %e, "Upstream connect failed");
            return Err(UpstreamError::Connect(e));
        }
        Err(_) => {
            tracing::warn!(upstream = %addr, "Upstream connect timed out");
            return Err(UpstreamError::Timeout);
        }
    };
    let _ = stream.set_nodelay(true);

    let (command_tx, mut commands) = mpsc::unbounded_channel();
    let (event_tx, mut events) = oneshot::channel();
    let mut adapter = UpstreamAdapter::new(
        bridge,
        ChannelTransport(command_tx),
        ChannelSink(Some(event_tx)),
        RequestIdGenerator::global().clone(),
    );

    match adapter.send_request(source) {
        Dispatch::Written { request_id } => {
            tracing::debug!(upstream = %addr, request_id, "Dubbo request written");
        }
        Dispatch::Deferred(deferred) => {
            tokio::task::yield_now().await;
            adapter.run_deferred(deferred);
        }
        Dispatch::Ignored => {}
    }

    let call = exchange(&mut stream, &mut adapter, &mut commands, &mut events);
    match tokio::time::timeout(timeouts.request, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(upstream = %addr, "Upstream request timed out");
            adapter.reset();
            Err(UpstreamError::Timeout)
        }
    }
}

async fn exchange(
    stream: &mut TcpStream,
    adapter: &mut ChannelAdapter,
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
    events: &mut oneshot::Receiver<SinkEvent>,
) -> Result<BridgeResponse, UpstreamError> {
    let mut chunk = BytesMut::with_capacity(READ_CHUNK);
    loop {
        while let Ok(command) = commands.try_recv() {
            match command {
                TransportCommand::Write(frame) => {
                    if let Err(e) = stream.write_all(&frame).await {
                        tracing::warn!(error = %e, "Upstream write failed");
                        adapter.on_connection_closed();
                    }
                }
                TransportCommand::Close => {
                    if let Err(e) = stream.shutdown().await {
                        tracing::debug!(error = %e, "Upstream shutdown failed");
                    }
                }
            }
        }

        match events.try_recv() {
            Ok(SinkEvent::Response(response)) => return Ok(response),
            Ok(SinkEvent::Reset) | Err(oneshot::error::TryRecvError::Closed) => {
                return Err(UpstreamError::Reset)
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        chunk.clear();
        match stream.read_buf(&mut chunk).await {
            Ok(0) => {
                adapter.on_data(&[], true);
                adapter.on_connection_closed();
            }
            Ok(_) => adapter.on_data(&chunk, false),
            Err(e) => {
                tracing::warn!(error = %e, "Upstream read failed");
                adapter.on_connection_closed();
            }
        }
    }
}
