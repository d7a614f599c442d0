//! Per-route invocation context and the generic-invoke request writer.
//!
//! # Responsibilities
//! - Compile a route's context configuration once (defaults parsed and converted)
//! - Write the `$invoke` request body: target method, parameter types, argument
//!   values, attachments
//!
//! # Design Decisions
//! - A context is immutable after construction and shared by every request on the route
//! - Attachments keep configuration order within each source; a later source
//!   (static, header, cookie, provider) overrides an earlier value of the same name

use bytes::{Bytes, BytesMut};

use crate::bridge::convert::convert;
use crate::bridge::generic::{annotate, GenericType};
use crate::bridge::source::{ArgumentProvider, RequestSource};
use crate::config::schema::{ArgumentSource, ContextConfig, ParameterConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{Encoder, ValueTree};
use crate::protocol::{write_request_frame, RequestIdGenerator};

const DUBBO_VERSION: &str = "2.0.2";
const GENERIC_METHOD: &str = "$invoke";
const GENERIC_PARAMETER_TYPES: &str = "Ljava/lang/String;[Ljava/lang/String;[Ljava/lang/Object;";

/// One declared parameter of the target method.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub index: usize,
    pub name: String,
    pub type_name: String,
    pub required: bool,
    /// Value sent when the request carries no argument. `Null` unless configured.
    pub default: ValueTree,
    pub generic: Vec<GenericType>,
}

impl Parameter {
    pub fn from_config(
        index: usize,
        config: &ParameterConfig,
        ignore_null_map_pair: bool,
    ) -> BridgeResult<Self> {
        let invalid_default = |raw: &str| BridgeError::InvalidDefaultJson {
            name: config.name.clone(),
            type_name: config.type_name.clone(),
            raw: raw.to_string(),
        };

        let default = match &config.default {
            Some(raw) => {
                let json: serde_json::Value =
                    serde_json::from_str(raw).map_err(|_| invalid_default(raw))?;
                convert(&json, &config.type_name, ignore_null_map_pair)?
            }
            None => ValueTree::null(),
        };

        Ok(Self {
            index,
            name: config.name.clone(),
            type_name: config.type_name.clone(),
            required: config.required,
            default,
            generic: config
                .generic
                .iter()
                .map(|g| GenericType::new(g.path.clone(), g.type_name.clone()))
                .collect(),
        })
    }
}

/// A complete request frame ready to be written upstream.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub request_id: i64,
    pub frame: Bytes,
}

#[derive(Debug, Clone)]
pub struct BridgeContext {
    service: String,
    version: String,
    method: String,
    ignore_null_map_pair: bool,
    static_attachments: Vec<(String, String)>,
    /// Attachment name → lowercased header name.
    header_attachments: Vec<(String, String)>,
    /// Attachment name → cookie name.
    cookie_attachments: Vec<(String, String)>,
    parameters: Vec<Parameter>,
    source: ArgumentSource,
    has_unnamed_parameter: bool,
}

impl BridgeContext {
    pub fn from_config(config: &ContextConfig) -> BridgeResult<Self> {
        let mut static_attachments = Vec::new();
        let mut header_attachments = Vec::new();
        let mut cookie_attachments = Vec::new();

        if !config.group.is_empty() {
            static_attachments.push(("group".to_string(), config.group.clone()));
        }

        for attachment in &config.attachments {
            let name = attachment.name.clone();
            if let Some(value) = &attachment.static_value {
                static_attachments.push((name, value.clone()));
            } else if let Some(header) = &attachment.header {
                header_attachments.push((name, header.to_ascii_lowercase()));
            } else if let Some(cookie) = &attachment.cookie {
                cookie_attachments.push((name, cookie.clone()));
            }
        }

        let parameters = config
            .parameters
            .iter()
            .enumerate()
            .map(|(index, p)| Parameter::from_config(index, p, config.ignore_null_map_pair))
            .collect::<BridgeResult<Vec<_>>>()?;
        let has_unnamed_parameter = parameters.iter().any(|p| p.name.is_empty());

        Ok(Self {
            service: config.service.clone(),
            version: config.version.clone(),
            method: config.method.clone(),
            ignore_null_map_pair: config.ignore_null_map_pair,
            static_attachments,
            header_attachments,
            cookie_attachments,
            parameters,
            source: config.source,
            has_unnamed_parameter,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn argument_source(&self) -> ArgumentSource {
        self.source
    }

    pub fn ignore_null_map_pair(&self) -> bool {
        self.ignore_null_map_pair
    }

    /// Whether any parameter was declared without a name.
    pub fn has_unnamed_parameter(&self) -> bool {
        self.has_unnamed_parameter
    }

    /// Encode a complete request frame for one HTTP request.
    pub fn build_request(
        &self,
        source: &RequestSource,
        arguments: &dyn ArgumentProvider,
        ids: &RequestIdGenerator,
    ) -> BridgeResult<EncodedRequest> {
        let request_id = ids.next_id();
        let mut frame = BytesMut::new();
        write_request_frame(&mut frame, request_id, |body| {
            self.write_body(body, source, arguments)
        })?;

        tracing::trace!(
            request_id,
            service = %self.service,
            method = %self.method,
            frame_len = frame.len(),
            "Encoded dubbo request"
        );

        Ok(EncodedRequest {
            request_id,
            frame: frame.freeze(),
        })
    }

    /// Attachments in source order: static, header, cookie, then provider supplied.
    /// A later source replaces the value of an earlier one with the same name.
    fn attachments<'a>(
        &'a self,
        source: &'a RequestSource,
        arguments: &'a dyn ArgumentProvider,
    ) -> Vec<(&'a str, &'a str)> {
        let statics = self
            .static_attachments
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        let headers = self
            .header_attachments
            .iter()
            .filter_map(|(name, header)| Some((name.as_str(), source.header(header)?)));
        let cookies = self
            .cookie_attachments
            .iter()
            .filter_map(|(name, cookie)| Some((name.as_str(), source.cookie(cookie)?)));
        let dynamic = arguments
            .attachments()
            .unwrap_or_default()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));

        let mut merged: Vec<(&str, &str)> = Vec::new();
        for (name, value) in statics.chain(headers).chain(cookies).chain(dynamic) {
            match merged.iter_mut().find(|(seen, _)| *seen == name) {
                Some(entry) => {
                    tracing::trace!(attachment = %name, "Attachment overridden by later source");
                    entry.1 = value;
                }
                None => merged.push((name, value)),
            }
        }
        merged
    }

    fn write_body(
        &self,
        body: &mut BytesMut,
        source: &RequestSource,
        arguments: &dyn ArgumentProvider,
    ) -> BridgeResult<()> {
        let mut encoder = Encoder::new(body);

        encoder.write_string(DUBBO_VERSION);
        encoder.write_string(&self.service);
        encoder.write_string(&self.version);
        encoder.write_string(GENERIC_METHOD);
        encoder.write_string(GENERIC_PARAMETER_TYPES);
        encoder.write_string(&self.method);

        encoder.write_list_begin(self.parameters.len());
        for parameter in &self.parameters {
            encoder.write_string(&parameter.type_name);
        }

        encoder.write_list_begin(self.parameters.len());
        for parameter in &self.parameters {
            match arguments.argument(parameter)? {
                Some(mut value) => {
                    annotate(&parameter.generic, &mut value);
                    encoder.write_tree(&value);
                }
                None if parameter.required => {
                    return Err(BridgeError::MissingRequiredParameter {
                        index: parameter.index,
                        name: parameter.name.clone(),
                        type_name: parameter.type_name.clone(),
                    });
                }
                None => encoder.write_tree(&parameter.default),
            }
        }

        encoder.write_map_begin();
        for (name, value) in self.attachments(source, arguments) {
            encoder.write_string(name);
            encoder.write_string(value);
        }
        encoder.write_map_end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::source::{simple_arguments, EmptyArguments};
    use crate::config::schema::{AttachmentConfig, GenericConfig};
    use crate::hessian::{Decoder, Value};
    use axum::http::HeaderMap;

    fn param(type_name: &str, name: &str) -> ParameterConfig {
        ParameterConfig {
            type_name: type_name.into(),
            name: name.into(),
            required: false,
            default: None,
            generic: vec![],
        }
    }

    fn attachment(name: &str, static_value: Option<&str>, header: Option<&str>, cookie: Option<&str>) -> AttachmentConfig {
        AttachmentConfig {
            name: name.into(),
            static_value: static_value.map(Into::into),
            header: header.map(Into::into),
            cookie: cookie.map(Into::into),
        }
    }

    fn context(parameters: Vec<ParameterConfig>) -> ContextConfig {
        ContextConfig {
            service: "com.example.UserService".into(),
            version: "1.0.0".into(),
            method: "getUser".into(),
            group: String::new(),
            source: ArgumentSource::Body,
            ignore_null_map_pair: false,
            parameters,
            attachments: vec![],
        }
    }

    fn source(body: &str) -> RequestSource {
        RequestSource::new(HeaderMap::new(), "/user", Bytes::from(body.to_string()))
    }

    /// Decode the body of `frame` into its sequence of top-level values.
    fn body_values(frame: &[u8]) -> Vec<ValueTree> {
        let body = &frame[16..];
        let mut decoder = Decoder::new(body);
        let mut values = Vec::new();
        while decoder.offset() < body.len() {
            values.push(decoder.read_tree().unwrap());
        }
        values
    }

    fn string_at(values: &[ValueTree], index: usize) -> String {
        values[index].root_value().as_str().unwrap().to_string()
    }

    #[test]
    fn writes_generic_invoke_body() {
        let ctx = BridgeContext::from_config(&context(vec![param("java.lang.Long", "id")])).unwrap();
        let src = source(r#"{"id": 7}"#);
        let args = simple_arguments(&ctx, &src).unwrap();
        let request = ctx
            .build_request(&src, args.as_ref(), &RequestIdGenerator::starting_at(5))
            .unwrap();

        assert_eq!(request.request_id, 5);
        assert_eq!(&request.frame[..4], &[0xda, 0xbb, 0xc2, 0x00]);
        assert_eq!(&request.frame[4..12], &5i64.to_be_bytes());
        let declared = u32::from_be_bytes([
            request.frame[12],
            request.frame[13],
            request.frame[14],
            request.frame[15],
        ]);
        assert_eq!(declared as usize, request.frame.len() - 16);

        let values = body_values(&request.frame);
        assert_eq!(string_at(&values, 0), "2.0.2");
        assert_eq!(string_at(&values, 1), "com.example.UserService");
        assert_eq!(string_at(&values, 2), "1.0.0");
        assert_eq!(string_at(&values, 3), "$invoke");
        assert_eq!(string_at(&values, 4), GENERIC_PARAMETER_TYPES);
        assert_eq!(string_at(&values, 5), "getUser");

        let types = &values[6];
        let Value::List { items, .. } = types.root_value() else {
            panic!("parameter types not a list");
        };
        assert_eq!(types.get(items[0]).as_str(), Some("java.lang.Long"));

        let args = &values[7];
        let Value::List { items, .. } = args.root_value() else {
            panic!("arguments not a list");
        };
        assert_eq!(args.get(items[0]), &Value::Int(7));

        assert!(matches!(values[8].root_value(), Value::Map { .. }));
        assert_eq!(values.len(), 9);
    }

    #[test]
    fn missing_required_parameter_fails() {
        let mut p = param("java.lang.Long", "id");
        p.required = true;
        let ctx = BridgeContext::from_config(&context(vec![p])).unwrap();
        let src = source("{}");
        let args = simple_arguments(&ctx, &src).unwrap();
        let err = ctx
            .build_request(&src, args.as_ref(), &RequestIdGenerator::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dubbo bridge: 0/id/java.lang.Long is required but not provided"
        );
    }

    #[test]
    fn default_is_used_for_missing_argument() {
        let mut p = param("int", "page");
        p.default = Some("10".into());
        let ctx = BridgeContext::from_config(&context(vec![p])).unwrap();
        let src = source("{}");
        let args = simple_arguments(&ctx, &src).unwrap();
        let request = ctx
            .build_request(&src, args.as_ref(), &RequestIdGenerator::new())
            .unwrap();
        let values = body_values(&request.frame);
        let Value::List { items, .. } = values[7].root_value() else {
            panic!("arguments not a list");
        };
        assert_eq!(values[7].get(items[0]), &Value::Int(10));
    }

    #[test]
    fn invalid_default_fails_setup() {
        let mut p = param("int", "page");
        p.default = Some("{oops".into());
        let err = BridgeContext::from_config(&context(vec![p])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Dubbo bridge: default value: page/int of {oops is invalid Json"
        );

        let mut p = param("int", "page");
        p.default = Some("true".into());
        assert!(matches!(
            BridgeContext::from_config(&context(vec![p])).unwrap_err(),
            BridgeError::InvalidValue { .. }
        ));
    }

    #[test]
    fn generic_annotation_applies_to_arguments() {
        let mut p = param("com.example.Query", "query");
        p.generic = vec![GenericConfig {
            path: String::new(),
            type_name: "com.example.Query".into(),
        }];
        let ctx = BridgeContext::from_config(&context(vec![p])).unwrap();
        let src = source(r#"{"query": {"q": "x"}}"#);
        let args = simple_arguments(&ctx, &src).unwrap();
        let request = ctx
            .build_request(&src, args.as_ref(), &RequestIdGenerator::new())
            .unwrap();
        let values = body_values(&request.frame);
        let Value::List { items, .. } = values[7].root_value() else {
            panic!("arguments not a list");
        };
        let class = values[7].map_get(items[0], "class").unwrap();
        assert_eq!(values[7].get(class).as_str(), Some("com.example.Query"));
    }

    #[test]
    fn attachments_follow_source_order() {
        let mut config = context(vec![]);
        config.group = "blue".into();
        config.attachments = vec![
            attachment("from-cookie", None, None, Some("session")),
            attachment("from-header", None, Some("X-Trace-Id"), None),
            attachment("tenant", Some("acme"), None, None),
            attachment("absent", None, Some("X-Missing"), None),
        ];
        let ctx = BridgeContext::from_config(&config).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "t-1".parse().unwrap());
        headers.insert("cookie", "a=1; session=s-9".parse().unwrap());
        let src = RequestSource::new(headers, "/", Bytes::new());

        let request = ctx
            .build_request(&src, &EmptyArguments, &RequestIdGenerator::new())
            .unwrap();
        let values = body_values(&request.frame);
        let map = &values[8];
        let Value::Map { entries, .. } = map.root_value() else {
            panic!("attachments not a map");
        };
        let pairs: Vec<(String, String)> = entries
            .iter()
            .map(|(k, v)| {
                (
                    map.get(*k).as_str().unwrap().to_string(),
                    map.get(*v).as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            pairs,
            [
                ("group".to_string(), "blue".to_string()),
                ("tenant".to_string(), "acme".to_string()),
                ("from-header".to_string(), "t-1".to_string()),
                ("from-cookie".to_string(), "s-9".to_string()),
            ]
        );
    }

    struct Attaching(Vec<(String, String)>);

    impl ArgumentProvider for Attaching {
        fn argument(&self, _: &Parameter) -> BridgeResult<Option<ValueTree>> {
            Ok(None)
        }

        fn attachments(&self) -> Option<&[(String, String)]> {
            Some(&self.0)
        }
    }

    fn attachment_pairs(frame: &[u8]) -> Vec<(String, String)> {
        let values = body_values(frame);
        let map = &values[8];
        let Value::Map { entries, .. } = map.root_value() else {
            panic!("attachments not a map");
        };
        entries
            .iter()
            .map(|(k, v)| {
                (
                    map.get(*k).as_str().unwrap().to_string(),
                    map.get(*v).as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn provider_attachments_override_configured_ones() {
        let mut config = context(vec![]);
        config.attachments = vec![
            attachment("tenant", Some("static"), None, None),
            attachment("tenant", None, Some("X-Tenant"), None),
            attachment("tenant", None, None, Some("tenant")),
            attachment("region", Some("eu"), None, None),
            attachment("region", None, Some("X-Region"), None),
        ];
        let ctx = BridgeContext::from_config(&config).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", "header".parse().unwrap());
        headers.insert("x-region", "us".parse().unwrap());
        headers.insert("cookie", "tenant=cookie".parse().unwrap());
        let src = RequestSource::new(headers, "/", Bytes::new());

        let without = ctx
            .build_request(&src, &EmptyArguments, &RequestIdGenerator::new())
            .unwrap();
        assert_eq!(
            attachment_pairs(&without.frame),
            [
                ("tenant".to_string(), "cookie".to_string()),
                ("region".to_string(), "us".to_string()),
            ]
        );

        let provider = Attaching(vec![
            ("tenant".to_string(), "dynamic".to_string()),
            ("trace".to_string(), "t-1".to_string()),
        ]);
        let with = ctx
            .build_request(&src, &provider, &RequestIdGenerator::new())
            .unwrap();
        assert_eq!(
            attachment_pairs(&with.frame),
            [
                ("tenant".to_string(), "dynamic".to_string()),
                ("region".to_string(), "us".to_string()),
                ("trace".to_string(), "t-1".to_string()),
            ]
        );
    }

    #[test]
    fn unnamed_parameters_are_tracked() {
        let ctx = BridgeContext::from_config(&context(vec![param("int", ""), param("int", "b")]))
            .unwrap();
        assert!(ctx.has_unnamed_parameter());
        assert_eq!(ctx.parameters()[1].index, 1);
    }
}
