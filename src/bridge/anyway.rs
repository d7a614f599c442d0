//! "Anyway" conventions: arguments from whatever the request carries, and an
//! envelope for failures.
//!
//! The argument source is chosen per request:
//! - `GET` reads the query, unless every parameter is named, the route reads
//!   the body and a body is present
//! - other methods read the configured source, falling back to the other one
//!   when the configured one is empty
//! - a body is JSON, form-urlencoded or plain text according to `content-type`
//!
//! Every `x-nsf-*` header is sent as an attachment.

use axum::http::{header, Method};
use bytes::Bytes;
use serde_json::Value as Json;

use crate::bridge::context::{BridgeContext, Parameter};
use crate::bridge::convert::{convert, convert_text};
use crate::bridge::response::{Rendered, ResponseKind, ResponseRenderer};
use crate::bridge::serialize::{push_json_str, to_json_string};
use crate::bridge::source::{ArgumentProvider, EmptyArguments, RequestSource};
use crate::config::schema::ArgumentSource;
use crate::error::{BridgeError, BridgeResult};
use crate::hessian::{Value, ValueTree};

/// Headers forwarded as attachments.
pub const ATTACHMENT_HEADER_PREFIX: &str = "x-nsf-";

/// Status of an exception envelope.
pub const EXCEPTION_STATUS: u16 = 610;

fn invalid(message: &str) -> BridgeError {
    BridgeError::InvalidArguments(message.to_string())
}

/// Keeps the first value of every name.
fn first_per_name(pairs: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    let mut unique: Vec<(String, String)> = Vec::new();
    for (name, value) in pairs {
        if !unique.iter().any(|(seen, _)| *seen == name) {
            unique.push((name, value));
        }
    }
    unique
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Where the arguments of one request are read from.
pub fn effective_source(context: &BridgeContext, source: &RequestSource) -> ArgumentSource {
    let configured = context.argument_source();
    let has_body = !source.body().is_empty();

    if *source.method() == Method::GET {
        return if !context.has_unnamed_parameter() && configured == ArgumentSource::Body && has_body {
            ArgumentSource::Body
        } else {
            ArgumentSource::Query
        };
    }

    match configured {
        ArgumentSource::Body if has_body => ArgumentSource::Body,
        ArgumentSource::Body => ArgumentSource::Query,
        ArgumentSource::Query if source.query_pairs().is_empty() => ArgumentSource::Body,
        ArgumentSource::Query => ArgumentSource::Query,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyType {
    Json,
    Form,
    Text,
}

impl BodyType {
    fn of(source: &RequestSource) -> Self {
        match source.header(header::CONTENT_TYPE.as_str()) {
            Some(ct) if ct.contains("application/x-www-form-urlencoded") => BodyType::Form,
            Some(ct) if ct.contains("text/plain") => BodyType::Text,
            _ => BodyType::Json,
        }
    }
}

/// Arguments read from query or body, plus `x-nsf-*` attachments.
pub struct AnywayArguments {
    inner: Box<dyn ArgumentProvider>,
    attachments: Vec<(String, String)>,
}

impl AnywayArguments {
    pub fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        let attachments = source.headers_with_prefix(ATTACHMENT_HEADER_PREFIX);

        if context.parameters().is_empty() {
            return Ok(Self {
                inner: Box::new(EmptyArguments),
                attachments,
            });
        }

        let from = effective_source(context, source);
        let body_type = BodyType::of(source);
        tracing::debug!(source = ?from, body = ?body_type, "Anyway argument source");

        let inner: Box<dyn ArgumentProvider> = match (from, body_type) {
            (ArgumentSource::Query, _) => {
                Box::new(TextPairs::new(context, source.query_pairs(), "query")?)
            }
            (ArgumentSource::Body, BodyType::Json) => Box::new(JsonBody::new(context, source)?),
            (ArgumentSource::Body, BodyType::Form) => {
                let pairs = url::form_urlencoded::parse(source.body()).into_owned();
                Box::new(TextPairs::new(context, pairs, "form")?)
            }
            (ArgumentSource::Body, BodyType::Text) => Box::new(TextBody::new(context, source)?),
        };

        Ok(Self { inner, attachments })
    }
}

impl ArgumentProvider for AnywayArguments {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        self.inner.argument(parameter)
    }

    fn attachments(&self) -> Option<&[(String, String)]> {
        Some(&self.attachments)
    }
}

/// Name/value pairs from the query string or a form body.
struct TextPairs {
    pairs: Vec<(String, String)>,
    single_parameter: bool,
    unnamed: bool,
    /// Form bodies hand every field to a single unnamed parameter.
    collect_unnamed: bool,
    ignore_null_map_pair: bool,
}

impl TextPairs {
    fn new(
        context: &BridgeContext,
        pairs: impl IntoIterator<Item = (String, String)>,
        origin: &str,
    ) -> BridgeResult<Self> {
        let single_parameter = context.parameters().len() == 1;
        let unnamed = context.has_unnamed_parameter();
        if unnamed && !single_parameter {
            return Err(BridgeError::InvalidArguments(format!(
                "lost parameter name but multiple arguments is necessary for {origin} source"
            )));
        }
        Ok(Self {
            pairs: first_per_name(pairs),
            single_parameter,
            unnamed,
            collect_unnamed: origin == "form",
            ignore_null_map_pair: context.ignore_null_map_pair(),
        })
    }

    fn text(&self, raw: &str, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        convert_text(raw, &parameter.type_name, self.ignore_null_map_pair).map(Some)
    }
}

impl ArgumentProvider for TextPairs {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        if self.single_parameter && self.unnamed {
            if self.collect_unnamed {
                let object: serde_json::Map<String, Json> = self
                    .pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                    .collect();
                return convert(&Json::Object(object), &parameter.type_name, self.ignore_null_map_pair)
                    .map(Some);
            }
            return match self.pairs.as_slice() {
                [] => Ok(None),
                [(_, value)] => self.text(value, parameter),
                _ => Err(invalid("lost parameter name but multiple queries is provided")),
            };
        }

        // A lone query value fills a lone parameter whatever its name.
        if self.single_parameter && !self.collect_unnamed {
            if let [(_, value)] = self.pairs.as_slice() {
                return self.text(value, parameter);
            }
        }

        match lookup(&self.pairs, &parameter.name) {
            Some(value) => self.text(value, parameter),
            None => Ok(None),
        }
    }
}

/// JSON body. A single parameter also accepts a body that is not JSON, as a string.
struct JsonBody {
    document: Json,
    single_parameter: bool,
    unnamed: bool,
    ignore_null_map_pair: bool,
}

impl JsonBody {
    fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        let single_parameter = context.parameters().len() == 1;
        let raw = || Json::String(String::from_utf8_lossy(source.body()).into_owned());

        let document = if source.body().is_empty() {
            raw()
        } else {
            match serde_json::from_slice(source.body()) {
                Ok(document) => document,
                Err(_) if single_parameter => raw(),
                Err(_) => return Err(invalid("error Json body for multiple parameters")),
            }
        };

        Ok(Self {
            document,
            single_parameter,
            unnamed: context.has_unnamed_parameter(),
            ignore_null_map_pair: context.ignore_null_map_pair(),
        })
    }

    fn convert(&self, json: &Json, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        convert(json, &parameter.type_name, self.ignore_null_map_pair).map(Some)
    }
}

impl ArgumentProvider for JsonBody {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        match (self.single_parameter, self.unnamed, &self.document) {
            (true, true, document) => self.convert(document, parameter),
            (true, false, Json::Object(members)) | (false, false, Json::Object(members)) => {
                match members.get(&parameter.name) {
                    Some(member) => self.convert(member, parameter),
                    None => Ok(None),
                }
            }
            (true, false, document) => self.convert(document, parameter),
            (false, true, Json::Array(items)) => match items.get(parameter.index) {
                Some(item) => self.convert(item, parameter),
                None => Ok(None),
            },
            (false, _, _) => Ok(None),
        }
    }
}

/// The whole body as the text of a single parameter.
struct TextBody {
    text: String,
    ignore_null_map_pair: bool,
}

impl TextBody {
    fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        if context.parameters().len() > 1 {
            return Err(invalid("multiple parameters is not allowed for plain body source"));
        }
        Ok(Self {
            text: String::from_utf8_lossy(source.body()).into_owned(),
            ignore_null_map_pair: context.ignore_null_map_pair(),
        })
    }
}

impl ArgumentProvider for TextBody {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        convert_text(&self.text, &parameter.type_name, self.ignore_null_map_pair).map(Some)
    }
}

/// `{"instance":"<gateway>","result":<json>}`
pub(crate) fn envelope(instance: &str, fields: &[(&str, String)], result: &str) -> String {
    let mut out = String::from("{\"instance\":");
    push_json_str(&mut out, instance);
    for (name, value) in fields {
        out.push(',');
        push_json_str(&mut out, name);
        out.push(':');
        out.push_str(value);
    }
    out.push_str(",\"result\":");
    out.push_str(result);
    out.push('}');
    out
}

/// Values pass through raw; exceptions (610) and local errors (400) are wrapped.
#[derive(Debug, Clone)]
pub struct AnywayRenderer {
    instance: String,
}

impl AnywayRenderer {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }
}

impl ResponseRenderer for AnywayRenderer {
    fn render(&self, value: Option<&ValueTree>, kind: ResponseKind) -> BridgeResult<Rendered> {
        let Some(tree) = value else {
            return Ok(Rendered::body("null"));
        };

        let status = match kind {
            ResponseKind::Exception => EXCEPTION_STATUS,
            ResponseKind::Local => 400,
            ResponseKind::Value => {
                return Ok(match tree.root_value() {
                    Value::Binary(bytes) => Rendered::with_status(Bytes::from(bytes.clone()), 200),
                    Value::String(text) => Rendered::with_status(text.clone(), 200),
                    _ => Rendered::with_status(to_json_string(tree)?, 200),
                });
            }
        };
        let result = to_json_string(tree)?;
        Ok(Rendered::with_status(envelope(&self.instance, &[], &result), status))
    }
}
