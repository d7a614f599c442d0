//! Shared utilities for integration tests: a mock Dubbo provider and a gateway launcher.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use dubbo_bridge::bridge::serialize::to_json_string;
use dubbo_bridge::config::schema::{
    ArgumentSource, AttachmentConfig, BridgeConfig, ContextConfig, GatewayConfig, ParameterConfig,
    RouteConfig,
};
use dubbo_bridge::hessian::{Decoder, Encoder};
use dubbo_bridge::http::HttpServer;
use dubbo_bridge::lifecycle::Shutdown;
use dubbo_bridge::protocol::header::{encode_response_header, ResponseStatus, HEADER_SIZE};

/// One generic invocation as seen by the provider. Trees are rendered as JSON.
#[derive(Debug, Clone)]
pub struct DubboCall {
    pub request_id: i64,
    pub dubbo_version: String,
    pub service: String,
    pub version: String,
    pub method: String,
    pub parameter_types: String,
    pub arguments: String,
    pub attachments: String,
}

fn parse_call(request_id: i64, body: &[u8]) -> DubboCall {
    let mut decoder = Decoder::new(body);
    let dubbo_version = decoder.read_string().unwrap();
    let service = decoder.read_string().unwrap();
    let version = decoder.read_string().unwrap();
    assert_eq!(decoder.read_string().unwrap(), "$invoke");
    assert_eq!(
        decoder.read_string().unwrap(),
        "Ljava/lang/String;[Ljava/lang/String;[Ljava/lang/Object;"
    );
    let method = decoder.read_string().unwrap();
    let parameter_types = to_json_string(&decoder.read_tree().unwrap()).unwrap();
    let arguments = to_json_string(&decoder.read_tree().unwrap()).unwrap();
    let attachments = to_json_string(&decoder.read_tree().unwrap()).unwrap();
    assert_eq!(decoder.offset(), body.len());

    DubboCall {
        request_id,
        dubbo_version,
        service,
        version,
        method,
        parameter_types,
        arguments,
        attachments,
    }
}

async fn read_call(socket: &mut TcpStream) -> Option<DubboCall> {
    let mut header = [0u8; HEADER_SIZE];
    socket.read_exact(&mut header).await.ok()?;
    let request_id = i64::from_be_bytes(header[4..12].try_into().ok()?);
    let len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let mut body = vec![0u8; len as usize];
    socket.read_exact(&mut body).await.ok()?;
    Some(parse_call(request_id, &body))
}

/// What the mock provider does with a call.
pub enum Reply {
    Bytes(Vec<u8>),
    /// Close the connection without answering.
    Close,
}

/// Start a mock provider on an ephemeral port. Every received call is forwarded
/// on the returned channel.
pub async fn start_provider<F>(handler: F) -> (SocketAddr, mpsc::UnboundedReceiver<DubboCall>)
where
    F: Fn(&DubboCall) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some(call) = read_call(&mut socket).await else {
                    return;
                };
                let reply = (*handler)(&call);
                let _ = tx.send(call);
                if let Reply::Bytes(bytes) = reply {
                    let _ = socket.write_all(&bytes).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            });
        }
    });

    (addr, rx)
}

/// A response frame with `body` as payload.
pub fn frame(request_id: i64, status: ResponseStatus, heartbeat: bool, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_response_header(&mut buf, request_id, status, heartbeat, body.len() as u32);
    buf.extend_from_slice(body);
    buf.to_vec()
}

fn body_with(response_type: i32, write: impl FnOnce(&mut Encoder<'_>)) -> Vec<u8> {
    let mut body = BytesMut::new();
    let mut encoder = Encoder::new(&mut body);
    encoder.write_int(response_type);
    write(&mut encoder);
    body.to_vec()
}

pub fn string_reply(request_id: i64, value: &str) -> Vec<u8> {
    frame(request_id, ResponseStatus::Ok, false, &body_with(1, |e| e.write_string(value)))
}

pub fn exception_reply(request_id: i64, message: &str) -> Vec<u8> {
    frame(request_id, ResponseStatus::Ok, false, &body_with(0, |e| e.write_string(message)))
}

pub fn null_reply(request_id: i64) -> Vec<u8> {
    frame(request_id, ResponseStatus::Ok, false, &body_with(2, |_| {}))
}

pub fn heartbeat() -> Vec<u8> {
    frame(0, ResponseStatus::Ok, true, b"N")
}

pub fn context(service: &str, method: &str, parameters: &[(&str, &str)]) -> ContextConfig {
    ContextConfig {
        service: service.into(),
        version: String::new(),
        method: method.into(),
        group: String::new(),
        source: ArgumentSource::Body,
        ignore_null_map_pair: false,
        parameters: parameters
            .iter()
            .map(|(type_name, name)| ParameterConfig {
                type_name: type_name.to_string(),
                name: name.to_string(),
                required: false,
                default: None,
                generic: Vec::new(),
            })
            .collect(),
        attachments: Vec::new(),
    }
}

pub fn attachment(name: &str, static_value: Option<&str>, header: Option<&str>) -> AttachmentConfig {
    AttachmentConfig {
        name: name.into(),
        static_value: static_value.map(String::from),
        header: header.map(String::from),
        cookie: None,
    }
}

pub fn route(name: &str, prefix: &str, upstream: SocketAddr, context: Option<ContextConfig>) -> RouteConfig {
    let mut route = bridge_route(name, prefix, upstream, BridgeConfig::default());
    route.bridge = context.map(|context| BridgeConfig {
        context: Some(context),
        ..BridgeConfig::default()
    });
    route
}

/// A route with a fully specified bridge section.
pub fn bridge_route(name: &str, prefix: &str, upstream: SocketAddr, bridge: BridgeConfig) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        host: None,
        path_prefix: prefix.into(),
        upstream: upstream.to_string(),
        priority: 0,
        bridge: Some(bridge),
    }
}

/// Start the gateway on an ephemeral port.
pub async fn start_gateway(routes: Vec<RouteConfig>) -> (SocketAddr, Shutdown) {
    let mut config = GatewayConfig::default();
    config.routes = routes;
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 5;

    let server = HttpServer::new(&config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
