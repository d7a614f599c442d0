//! BFF gateway conventions.
//!
//! Requests carry the invocation target in `x-dubbo-*` headers and a JSON body
//! `{"paramValues": [...], "attachments": {...}}`. Every answer, success
//! included, is wrapped in an envelope with a business code.

use serde_json::Value as Json;

use crate::bridge::anyway::{envelope, ATTACHMENT_HEADER_PREFIX, EXCEPTION_STATUS};
use crate::bridge::context::{BridgeContext, Parameter};
use crate::bridge::convert::convert;
use crate::bridge::response::{Rendered, ResponseKind, ResponseRenderer};
use crate::bridge::serialize::{push_json_str, to_json_string};
use crate::bridge::source::{ArgumentProvider, RequestSource};
use crate::config::schema::{AttachmentConfig, ContextConfig, DynamicContextConfig, ParameterConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::hessian::ValueTree;

pub const SERVICE_HEADER: &str = "x-dubbo-service";
pub const VERSION_HEADER: &str = "x-dubbo-version";
pub const METHOD_HEADER: &str = "x-dubbo-method";
pub const GROUP_HEADER: &str = "x-dubbo-group";
/// `name:type;name:type`
pub const PARAMS_HEADER: &str = "x-dubbo-params";

const DEFAULT_VERSION: &str = "0.0.0";

fn invalid(message: &str) -> BridgeError {
    BridgeError::InvalidArguments(message.to_string())
}

/// Builds a context per request from `x-dubbo-*` headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderContext {
    attachments: Vec<AttachmentConfig>,
}

impl HeaderContext {
    pub fn from_config(config: &DynamicContextConfig) -> Self {
        Self {
            attachments: config.attachments.clone(),
        }
    }

    pub fn resolve(&self, source: &RequestSource) -> BridgeResult<BridgeContext> {
        let service = source.header(SERVICE_HEADER).ok_or_else(|| {
            invalid("no interface name provided and cannot convert HTTP to Dubbo")
        })?;
        let method = source
            .header(METHOD_HEADER)
            .ok_or_else(|| invalid("no method name provided and cannot convert HTTP to Dubbo"))?;

        let parameters = match source.header(PARAMS_HEADER).map(str::trim) {
            Some(params) if !params.is_empty() => parse_params(params)?,
            _ => {
                tracing::trace!("No params header, method takes no arguments");
                Vec::new()
            }
        };

        BridgeContext::from_config(&ContextConfig {
            service: service.to_string(),
            version: source.header(VERSION_HEADER).unwrap_or(DEFAULT_VERSION).to_string(),
            method: method.to_string(),
            group: source.header(GROUP_HEADER).unwrap_or_default().to_string(),
            source: Default::default(),
            ignore_null_map_pair: false,
            parameters,
            attachments: self.attachments.clone(),
        })
    }
}

fn parse_params(params: &str) -> BridgeResult<Vec<ParameterConfig>> {
    params
        .split(';')
        .map(|pair| {
            let (name, type_name) = pair.split_once(':').unwrap_or((pair, ""));
            if type_name.is_empty() {
                return Err(invalid("empty parameter type is not allowed"));
            }
            Ok(ParameterConfig {
                type_name: type_name.to_string(),
                name: name.to_string(),
                required: false,
                default: None,
                generic: Vec::new(),
            })
        })
        .collect()
}

/// Positional `paramValues` plus `x-nsf-*` headers and body `attachments`.
#[derive(Debug)]
pub struct BffArguments {
    values: Vec<Json>,
    attachments: Vec<(String, String)>,
}

impl BffArguments {
    pub fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        let document: Json = serde_json::from_slice(source.body())
            .map_err(|_| invalid("non Json body for the BFF gateway"))?;
        let Json::Object(mut body) = document else {
            return Err(invalid("request body is not Json Object for the BFF gateway"));
        };

        let values = match body.remove("paramValues") {
            Some(Json::Array(values)) => values,
            _ if context.parameters().is_empty() => Vec::new(),
            _ => return Err(invalid("no param values or param values is not array for BFF")),
        };

        // Header values win over body values with the same name.
        let mut attachments = source.headers_with_prefix(ATTACHMENT_HEADER_PREFIX);
        if let Some(Json::Object(extra)) = body.get("attachments") {
            for (name, value) in extra {
                if let Json::String(value) = value {
                    if !attachments.iter().any(|(seen, _)| seen == name) {
                        attachments.push((name.clone(), value.clone()));
                    }
                }
            }
        }

        Ok(Self {
            values,
            attachments,
        })
    }
}

impl ArgumentProvider for BffArguments {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        self.values
            .get(parameter.index)
            .map(|json| convert(json, &parameter.type_name, false))
            .transpose()
    }

    fn attachments(&self) -> Option<&[(String, String)]> {
        Some(&self.attachments)
    }
}

/// `{"instance":..,"code":..,"systemId":..,"result":..}` for every outcome.
#[derive(Debug, Clone)]
pub struct BffRenderer {
    instance: String,
    system_id: String,
}

impl BffRenderer {
    pub fn new(instance: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            system_id: system_id.into(),
        }
    }
}

impl ResponseRenderer for BffRenderer {
    fn render(&self, value: Option<&ValueTree>, kind: ResponseKind) -> BridgeResult<Rendered> {
        let (code, status) = match kind {
            ResponseKind::Value => (0, 200),
            ResponseKind::Exception => (EXCEPTION_STATUS, EXCEPTION_STATUS),
            ResponseKind::Local => (415, 400),
        };
        let result = match value {
            Some(tree) => to_json_string(tree)?,
            None => "null".to_string(),
        };

        let mut system_id = String::new();
        push_json_str(&mut system_id, &self.system_id);
        let body = envelope(
            &self.instance,
            &[("code", code.to_string()), ("systemId", system_id)],
            &result,
        );
        Ok(Rendered::with_status(body, status))
    }
}
