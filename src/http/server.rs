//! HTTP server setup.
//!
//! # Responsibilities
//! - Create Axum Router with the bridge handler as fallback
//! - Wire up middleware (tracing, body limit, request ID)
//! - Dispatch requests to the routing table and the upstream bridge
//! - Swap the route table when configuration reloads

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::bridge::{BridgeResponse, JsonRenderer, RequestSource};
use crate::config::schema::GatewayConfig;
use crate::error::BridgeResult;
use crate::http::request::{request_id, UuidRequestId};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::upstream::{invoke, UpstreamTimeouts};

pub const NO_ROUTE_MESSAGE: &str = "No matching route found";

/// Route table shared between the handler and the reloader.
pub type SharedRoutes = Arc<ArcSwap<RouteTable>>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: SharedRoutes,
    pub timeouts: UpstreamTimeouts,
    pub max_body_size: usize,
}

/// HTTP gateway bridging routes to Dubbo providers.
pub struct HttpServer {
    router: Router,
    routes: SharedRoutes,
}

impl HttpServer {
    /// Compile the routes of `config` and build the router.
    pub fn new(config: &GatewayConfig) -> BridgeResult<Self> {
        let table = RouteTable::from_config(&config.routes)?;
        let routes: SharedRoutes = Arc::new(ArcSwap::from_pointee(table));

        let state = AppState {
            routes: Arc::clone(&routes),
            timeouts: UpstreamTimeouts::from(&config.timeouts),
            max_body_size: config.limits.max_body_size,
        };

        Ok(Self {
            router: Self::build_router(state),
            routes,
        })
    }

    fn build_router(state: AppState) -> Router {
        let max_body_size = state.max_body_size;
        Router::new()
            .fallback(bridge_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(
                        |request: &Request<Body>| {
                            tracing::info_span!(
                                "request",
                                method = %request.method(),
                                uri = %request.uri(),
                                request_id = %request_id(request.headers()),
                            )
                        },
                    ))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(max_body_size)),
            )
    }

    /// Handle to the live route table.
    pub fn routes(&self) -> SharedRoutes {
        Arc::clone(&self.routes)
    }

    /// Serve until `shutdown` is triggered, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.routes.load().len(), "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Swap in every route table compiled by the watcher.
pub fn spawn_reloader(
    routes: SharedRoutes,
    mut updates: mpsc::UnboundedReceiver<RouteTable>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(table) = updates.recv().await {
            let count = table.len();
            routes.store(Arc::new(table));
            tracing::info!(routes = count, "Route table reloaded");
        }
    })
}

fn into_http(response: BridgeResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, response.body.len());
    if response.close_connection {
        builder = builder.header(header::CONNECTION, "close");
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn local(status: StatusCode, message: &str) -> Response {
    into_http(BridgeResponse::local(status.as_u16(), message, false, &JsonRenderer))
}

/// Looks up the route, buffers the body and runs the bridged call.
async fn bridge_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers).to_string();

    let table = state.routes.load_full();
    let Some(route) = table.match_request(&parts) else {
        tracing::warn!(request_id = %request_id, path = %parts.uri.path(), "No route matched");
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16(), start);
        return local(StatusCode::NOT_FOUND, NO_ROUTE_MESSAGE);
    };

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, route = %route.name, error = %e, "Failed to read request body");
            metrics::record_request(&route.name, StatusCode::PAYLOAD_TOO_LARGE.as_u16(), start);
            return local(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let source = RequestSource::new(parts.headers, path_and_query, body).with_method(parts.method);

    tracing::debug!(
        request_id = %request_id,
        route = %route.name,
        upstream = %route.upstream,
        "Bridging request"
    );

    let response = match invoke(&route.upstream, route.bridge.clone(), &source, state.timeouts).await {
        Ok(response) => into_http(response),
        Err(e) => {
            tracing::error!(request_id = %request_id, route = %route.name, error = %e, "Upstream error");
            local(e.status(), &e.to_string())
        }
    };

    metrics::record_request(&route.name, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn config(names: &[&str]) -> GatewayConfig {
        GatewayConfig {
            routes: names
                .iter()
                .map(|name| RouteConfig {
                    name: name.to_string(),
                    host: None,
                    path_prefix: format!("/{name}"),
                    upstream: "127.0.0.1:20880".into(),
                    priority: 0,
                    bridge: None,
                })
                .collect(),
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    async fn reloader_swaps_compiled_tables() {
        let server = HttpServer::new(&config(&["a"])).unwrap();
        let routes = server.routes();
        assert_eq!(routes.load().len(), 1);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_reloader(Arc::clone(&routes), rx);
        tx.send(RouteTable::from_config(&config(&["x", "y", "z"]).routes).unwrap())
            .unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(routes.load().len(), 3);
    }

    #[test]
    fn responses_carry_json_headers() {
        let response = into_http(BridgeResponse {
            status: 501,
            body: "\"boom\"".into(),
            close_connection: true,
        });
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::CONTENT_LENGTH], "6");
        assert_eq!(headers[header::CONNECTION], "close");
    }
}
