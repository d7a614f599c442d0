//! HTTP/JSON to Dubbo/Hessian2 bridge gateway.

pub mod bridge;
pub mod config;
pub mod error;
pub mod hessian;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod upstream;

pub use bridge::DubboBridge;
pub use config::schema::GatewayConfig;
pub use error::{BridgeError, BridgeResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
