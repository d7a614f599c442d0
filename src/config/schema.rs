//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the Dubbo bridge gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to Dubbo providers.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Route configuration mapping requests to one Dubbo provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match, port ignored).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Dubbo provider address (e.g., "127.0.0.1:20880").
    pub upstream: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// HTTP → Dubbo conversion. Requests on a route without it are rejected.
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

/// Per-route bridge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Status used when the provider response cannot be decoded.
    #[serde(default = "default_protocol_error_code")]
    pub protocol_error_code: u16,

    /// Status used when the provider answers with an exception.
    #[serde(default = "default_resp_exception_code")]
    pub resp_exception_code: u16,

    /// Fixed invocation target. Exactly one of `context` and `dynamic` is set.
    #[serde(default)]
    pub context: Option<ContextConfig>,

    /// Invocation target read from `x-dubbo-*` request headers.
    #[serde(default)]
    pub dynamic: Option<DynamicContextConfig>,

    #[serde(default)]
    pub arguments: ArgumentStyle,

    #[serde(default)]
    pub response: ResponseConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol_error_code: default_protocol_error_code(),
            resp_exception_code: default_resp_exception_code(),
            context: None,
            dynamic: None,
            arguments: ArgumentStyle::default(),
            response: ResponseConfig::default(),
        }
    }
}

fn default_protocol_error_code() -> u16 {
    501
}

fn default_resp_exception_code() -> u16 {
    503
}

/// How arguments and dynamic attachments are read from the request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentStyle {
    /// JSON body or JSON-literal query, per `context.source`.
    #[default]
    Simple,
    /// Source picked per request from method, body and content type;
    /// `x-nsf-*` headers become attachments.
    Anyway,
    /// `{"paramValues": [...], "attachments": {...}}` JSON body.
    Bff,
}

/// Shape of the HTTP response body.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ResponseConfig {
    /// Plain JSON of the returned value.
    #[default]
    Json,
    /// Raw values; exceptions and local errors wrapped in an envelope.
    Anyway {
        #[serde(default = "default_instance")]
        instance: String,
    },
    /// Every answer wrapped in an envelope with a business code.
    Bff {
        #[serde(default = "default_instance")]
        instance: String,
        #[serde(default = "default_system_id")]
        system_id: String,
    },
}

/// Gateway identity reported in response envelopes.
pub fn default_instance() -> String {
    std::env::var("INSTANCE_IP").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_system_id() -> String {
    "000361".to_string()
}

/// Settings for contexts built from request headers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamicContextConfig {
    /// Attachments added to every header-built context.
    pub attachments: Vec<AttachmentConfig>,
}

/// Where parameter values are taken from.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentSource {
    /// JSON request body.
    #[default]
    Body,
    /// URL query parameters, each value a JSON literal.
    Query,
}

/// The generic invocation a route performs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Interface name, e.g. "com.example.UserService".
    pub service: String,

    #[serde(default)]
    pub version: String,

    pub method: String,

    /// Sent as the `group` attachment when non-empty.
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub source: ArgumentSource,

    /// Drop object members whose value is JSON null.
    #[serde(default)]
    pub ignore_null_map_pair: bool,

    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,

    #[serde(default)]
    pub attachments: Vec<AttachmentConfig>,
}

/// One parameter of the target method, in declaration order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterConfig {
    /// Java type name, e.g. "java.lang.Long" or "int".
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub required: bool,

    /// JSON literal used when the request does not carry the argument.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub generic: Vec<GenericConfig>,
}

/// `class` annotation applied to a parameter value before encoding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenericConfig {
    /// Dotted path; `*` matches every element.
    #[serde(default)]
    pub path: String,

    #[serde(rename = "type")]
    pub type_name: String,
}

/// An attachment sent with every invocation. Exactly one source must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttachmentConfig {
    pub name: String,

    #[serde(default, rename = "static")]
    pub static_value: Option<String>,

    /// Request header to copy.
    #[serde(default)]
    pub header: Option<String>,

    /// Request cookie to copy.
    #[serde(default)]
    pub cookie: Option<String>,
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 3,
            request_secs: 30,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted HTTP request body in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_route_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[routes]]
            name = "user"
            upstream = "127.0.0.1:20880"

            [routes.bridge.context]
            service = "com.example.UserService"
            method = "getUser"

            [[routes.bridge.context.parameters]]
            type = "java.lang.Long"
            name = "id"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        let route = &config.routes[0];
        assert_eq!(route.path_prefix, "/");
        let bridge = route.bridge.as_ref().unwrap();
        assert_eq!(bridge.protocol_error_code, 501);
        assert_eq!(bridge.resp_exception_code, 503);
        assert_eq!(bridge.arguments, ArgumentStyle::Simple);
        assert_eq!(bridge.response, ResponseConfig::Json);
        assert!(bridge.dynamic.is_none());
        let context = bridge.context.as_ref().unwrap();
        assert_eq!(context.source, ArgumentSource::Body);
        assert_eq!(context.parameters[0].type_name, "java.lang.Long");
        assert!(!context.parameters[0].required);
    }

    #[test]
    fn attachments_and_generics_deserialize() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[routes]]
            name = "order"
            upstream = "127.0.0.1:20880"

            [routes.bridge.context]
            service = "S"
            method = "m"
            source = "query"

            [[routes.bridge.context.parameters]]
            type = "com.example.Order"
            name = "order"
            generic = [{ path = "items.*", type = "com.example.Item" }]

            [[routes.bridge.context.attachments]]
            name = "tenant"
            static = "acme"

            [[routes.bridge.context.attachments]]
            name = "trace"
            header = "X-Trace-Id"
            "#,
        )
        .unwrap();

        let context = config.routes[0]
            .bridge
            .as_ref()
            .and_then(|b| b.context.as_ref())
            .unwrap();
        assert_eq!(context.source, ArgumentSource::Query);
        assert_eq!(context.parameters[0].generic[0].type_name, "com.example.Item");
        assert_eq!(context.attachments[0].static_value.as_deref(), Some("acme"));
        assert_eq!(context.attachments[1].header.as_deref(), Some("X-Trace-Id"));
    }

    #[test]
    fn envelope_styles_deserialize() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[routes]]
            name = "bff"
            upstream = "127.0.0.1:20880"

            [routes.bridge]
            arguments = "bff"
            response = { format = "bff", instance = "10.0.0.7" }

            [[routes.bridge.dynamic.attachments]]
            name = "zone"
            static = "east"

            [[routes]]
            name = "anyway"
            upstream = "127.0.0.1:20880"

            [routes.bridge]
            arguments = "anyway"
            response = { format = "anyway", instance = "10.0.0.8" }

            [routes.bridge.context]
            service = "S"
            method = "m"
            "#,
        )
        .unwrap();

        let bff = config.routes[0].bridge.as_ref().unwrap();
        assert_eq!(bff.arguments, ArgumentStyle::Bff);
        assert_eq!(
            bff.response,
            ResponseConfig::Bff {
                instance: "10.0.0.7".into(),
                system_id: "000361".into(),
            }
        );
        assert!(bff.context.is_none());
        assert_eq!(bff.dynamic.as_ref().unwrap().attachments[0].name, "zone");

        let anyway = config.routes[1].bridge.as_ref().unwrap();
        assert_eq!(anyway.arguments, ArgumentStyle::Anyway);
        assert_eq!(
            anyway.response,
            ResponseConfig::Anyway {
                instance: "10.0.0.8".into()
            }
        );
    }
}
