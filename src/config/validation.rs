//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, status codes, addresses)
//! - Check every bridge compiles (default values are valid JSON)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::bridge::DubboBridge;
use crate::config::schema::{AttachmentConfig, BridgeConfig, GatewayConfig, RouteConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("route #{0} has an empty name")]
    EmptyRouteName(usize),

    #[error("duplicate route name '{0}'")]
    DuplicateRoute(String),

    #[error("route '{route}': path_prefix '{prefix}' must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("route '{route}': {field} must not be empty")]
    EmptyField { route: String, field: &'static str },

    #[error("route '{route}': {field} {code} is not a valid HTTP status")]
    InvalidStatus {
        route: String,
        field: &'static str,
        code: u16,
    },

    #[error("route '{route}': attachment '{name}' must set exactly one of static, header, cookie")]
    InvalidAttachment { route: String, name: String },

    #[error("route '{route}': {message}")]
    InvalidBridge { route: String, message: String },

    #[error("route '{0}': bridge must set exactly one of context, dynamic")]
    ContextChoice(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

/// Check `config` and report every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let mut names = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        if route.name.is_empty() {
            errors.push(ValidationError::EmptyRouteName(index));
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        validate_route(route, &mut errors);
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::Zero("limits.max_body_size"));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::InvalidLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a numeric port. Host names are resolved at connect time.
fn is_upstream_address(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

fn validate_route(route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    if !route.path_prefix.starts_with('/') {
        errors.push(ValidationError::InvalidPathPrefix {
            route: route.name.clone(),
            prefix: route.path_prefix.clone(),
        });
    }
    if !is_upstream_address(&route.upstream) {
        errors.push(ValidationError::InvalidAddress {
            field: "upstream",
            value: route.upstream.clone(),
        });
    }
    if let Some(bridge) = &route.bridge {
        validate_bridge(&route.name, bridge, errors);
    }
}

fn validate_bridge(route: &str, bridge: &BridgeConfig, errors: &mut Vec<ValidationError>) {
    let empty = |field: &'static str| ValidationError::EmptyField {
        route: route.to_string(),
        field,
    };

    for (field, code) in [
        ("protocol_error_code", bridge.protocol_error_code),
        ("resp_exception_code", bridge.resp_exception_code),
    ] {
        if !(100..=599).contains(&code) {
            errors.push(ValidationError::InvalidStatus {
                route: route.to_string(),
                field,
                code,
            });
        }
    }

    let attachments: &[AttachmentConfig] = match (&bridge.context, &bridge.dynamic) {
        (Some(context), None) => {
            if context.service.is_empty() {
                errors.push(empty("context.service"));
            }
            if context.method.is_empty() {
                errors.push(empty("context.method"));
            }
            for parameter in &context.parameters {
                if parameter.type_name.is_empty() {
                    errors.push(empty("parameter type"));
                }
                if parameter.generic.iter().any(|g| g.type_name.is_empty()) {
                    errors.push(empty("generic type"));
                }
            }
            &context.attachments
        }
        (None, Some(dynamic)) => &dynamic.attachments,
        _ => {
            errors.push(ValidationError::ContextChoice(route.to_string()));
            return;
        }
    };
    for attachment in attachments {
        if !has_single_source(attachment) || attachment.name.is_empty() {
            errors.push(ValidationError::InvalidAttachment {
                route: route.to_string(),
                name: attachment.name.clone(),
            });
        }
    }

    if let Err(e) = DubboBridge::from_config(bridge) {
        errors.push(ValidationError::InvalidBridge {
            route: route.to_string(),
            message: e.to_string(),
        });
    }
}

fn has_single_source(attachment: &AttachmentConfig) -> bool {
    [
        attachment.static_value.is_some(),
        attachment.header.is_some(),
        attachment.cookie.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count()
        == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> GatewayConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn valid_route_passes() {
        let config = parse(
            r#"
            [[routes]]
            name = "user"
            path_prefix = "/user"
            upstream = "provider.local:20880"

            [routes.bridge.context]
            service = "com.example.UserService"
            method = "getUser"

            [[routes.bridge.context.parameters]]
            type = "java.lang.Long"
            name = "id"
            default = "1"

            [[routes.bridge.context.attachments]]
            name = "tenant"
            header = "x-tenant"
            "#,
        );
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let config = parse(
            r#"
            [listener]
            bind_address = "nowhere"

            [timeouts]
            connect_secs = 0

            [[routes]]
            name = "a"
            path_prefix = "api"
            upstream = "127.0.0.1"

            [[routes]]
            name = "a"
            upstream = "127.0.0.1:20880"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::DuplicateRoute("a".into())));
        assert!(errors.contains(&ValidationError::Zero("timeouts.connect_secs")));
        assert!(errors.contains(&ValidationError::InvalidPathPrefix {
            route: "a".into(),
            prefix: "api".into()
        }));
    }

    #[test]
    fn bridge_problems_are_reported() {
        let config = parse(
            r#"
            [[routes]]
            name = "bad"
            upstream = "127.0.0.1:20880"

            [routes.bridge]
            protocol_error_code = 42

            [routes.bridge.context]
            service = ""
            method = "m"

            [[routes.bridge.context.parameters]]
            type = "java.lang.Long"
            name = "id"
            default = "{oops"

            [[routes.bridge.context.attachments]]
            name = "both"
            static = "x"
            header = "y"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            [
                "route 'bad': protocol_error_code 42 is not a valid HTTP status",
                "route 'bad': context.service must not be empty",
                "route 'bad': attachment 'both' must set exactly one of static, header, cookie",
                "route 'bad': Dubbo bridge: default value: id/java.lang.Long of {oops is invalid Json",
            ]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_address = "bogus".into();
        assert!(validate_config(&config).is_ok());
        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
        config.observability.log_level = "loud".into();
        assert_eq!(validate_config(&config).unwrap_err().len(), 2);
    }

    #[test]
    fn bridge_needs_exactly_one_context() {
        let both = parse(
            r#"
            [[routes]]
            name = "both"
            upstream = "127.0.0.1:20880"

            [routes.bridge.context]
            service = "S"
            method = "m"

            [routes.bridge.dynamic]
            "#,
        );
        assert_eq!(
            validate_config(&both).unwrap_err(),
            [ValidationError::ContextChoice("both".into())]
        );

        let neither = parse(
            r#"
            [[routes]]
            name = "neither"
            upstream = "127.0.0.1:20880"

            [routes.bridge]
            arguments = "anyway"
            "#,
        );
        assert_eq!(
            validate_config(&neither).unwrap_err(),
            [ValidationError::ContextChoice("neither".into())]
        );
    }

    #[test]
    fn dynamic_context_attachments_are_checked() {
        let config = parse(
            r#"
            [[routes]]
            name = "bff"
            upstream = "127.0.0.1:20880"

            [routes.bridge]
            arguments = "bff"
            response = { format = "bff" }

            [[routes.bridge.dynamic.attachments]]
            name = "zone"
            "#,
        );
        assert_eq!(
            validate_config(&config).unwrap_err(),
            [ValidationError::InvalidAttachment {
                route: "bff".into(),
                name: "zone".into()
            }]
        );
    }
}
