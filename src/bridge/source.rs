//! HTTP request view and argument providers.
//!
//! A [`RequestSource`] is the read-only HTTP side of one invocation. An
//! [`ArgumentProvider`] turns it into one value per declared parameter.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::Value as Json;

use crate::bridge::context::{BridgeContext, Parameter};
use crate::bridge::convert::convert;
use crate::config::schema::ArgumentSource;
use crate::error::{BridgeError, BridgeResult};
use crate::hessian::ValueTree;

/// Method, headers, path and fully buffered body of an HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestSource {
    method: Method,
    headers: HeaderMap,
    path_and_query: String,
    body: Bytes,
}

impl RequestSource {
    /// A `GET` request unless [`with_method`](Self::with_method) says otherwise.
    pub fn new(headers: HeaderMap, path_and_query: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: Method::GET,
            headers,
            path_and_query: path_and_query.into(),
            body,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Headers whose (lowercase) name starts with `prefix`, first value per name.
    pub fn headers_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.headers
            .keys()
            .filter(|name| name.as_str().starts_with(prefix))
            .filter_map(|name| {
                let value = self.headers.get(name)?.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie from any `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// Decoded query parameters in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self.path_and_query.split_once('?') {
            Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Supplies the argument for each declared parameter.
pub trait ArgumentProvider: Send + Sync {
    /// `Ok(None)` when the request does not carry this argument.
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>>;

    /// Attachments produced by the provider itself. They replace configured
    /// attachments with the same name.
    fn attachments(&self) -> Option<&[(String, String)]> {
        None
    }
}

/// Provider for contexts that declare no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyArguments;

impl ArgumentProvider for EmptyArguments {
    fn argument(&self, _parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        Ok(None)
    }
}

/// Arguments taken from a JSON body, by index for arrays and by name for objects.
#[derive(Debug, Clone)]
pub struct BodyArguments {
    document: Json,
    ignore_null_map_pair: bool,
}

impl BodyArguments {
    pub fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        let document: Json = serde_json::from_slice(source.body()).map_err(|_| {
            BridgeError::InvalidArguments("HTTP request body not valid Json string".into())
        })?;

        if context.has_unnamed_parameter() && !document.is_array() {
            return Err(BridgeError::InvalidArguments(
                "no parameter name is only allowed for HTTP request body of type Json array"
                    .into(),
            ));
        }

        Ok(Self {
            document,
            ignore_null_map_pair: context.ignore_null_map_pair(),
        })
    }
}

impl ArgumentProvider for BodyArguments {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        let value = match &self.document {
            Json::Array(items) => items.get(parameter.index),
            Json::Object(members) => members.get(&parameter.name),
            _ => None,
        };
        value
            .map(|json| convert(json, &parameter.type_name, self.ignore_null_map_pair))
            .transpose()
    }
}

/// Arguments taken from query parameters whose values are JSON literals.
#[derive(Debug, Clone)]
pub struct QueryArguments {
    params: Vec<(String, String)>,
    ignore_null_map_pair: bool,
}

impl QueryArguments {
    pub fn new(context: &BridgeContext, source: &RequestSource) -> BridgeResult<Self> {
        if context.has_unnamed_parameter() {
            return Err(BridgeError::InvalidArguments(
                "no parameter name is not allowed for query type source".into(),
            ));
        }
        Ok(Self {
            params: source.query_pairs(),
            ignore_null_map_pair: context.ignore_null_map_pair(),
        })
    }
}

impl ArgumentProvider for QueryArguments {
    fn argument(&self, parameter: &Parameter) -> BridgeResult<Option<ValueTree>> {
        let Some((_, raw)) = self.params.iter().find(|(name, _)| *name == parameter.name) else {
            return Ok(None);
        };
        let json: Json = serde_json::from_str(raw).map_err(|_| {
            BridgeError::InvalidArguments("query value not valid Json string".into())
        })?;
        convert(&json, &parameter.type_name, self.ignore_null_map_pair).map(Some)
    }
}

/// Pick the provider configured for `context`.
pub fn simple_arguments(
    context: &BridgeContext,
    source: &RequestSource,
) -> BridgeResult<Box<dyn ArgumentProvider>> {
    if context.parameters().is_empty() {
        return Ok(Box::new(EmptyArguments));
    }
    Ok(match context.argument_source() {
        ArgumentSource::Body => Box::new(BodyArguments::new(context, source)?),
        ArgumentSource::Query => Box::new(QueryArguments::new(context, source)?),
    })
}
